//! Grant handlers composing the claims of an access token

use super::claims::{ScopeSplit, TokenClaims};
use super::error::OAuthError;
use super::protocol::AccessRequest;
use crate::directory::{AccessControl, DirectoryError, UserDirectory};
use crate::models::identity::Namespace;
use crate::models::permission::{
    filter_by_actions, flatten, group_by_action, intersect, rewrite_self_scopes, scope_for,
    ACTION_USERS_IMPERSONATE,
};
use crate::models::{ExternalService, GrantType, Permission, Subject};
use log::debug;
use std::sync::Arc;

/// Host system lookups the handlers may need
#[derive(Clone)]
pub struct Collaborators {
    pub access_control: Arc<dyn AccessControl>,
    pub users: Arc<dyn UserDirectory>,
}

/// The closed set of grant handlers, run in declaration order.
///
/// Each handler is a no-op unless the request uses its grant type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantHandler {
    ClientCredentials,
    JwtBearer,
}

impl GrantHandler {
    pub const ALL: [GrantHandler; 2] = [GrantHandler::ClientCredentials, GrantHandler::JwtBearer];

    pub fn grant_type(&self) -> GrantType {
        match self {
            GrantHandler::ClientCredentials => GrantType::ClientCredentials,
            GrantHandler::JwtBearer => GrantType::JwtBearer,
        }
    }

    pub async fn handle(
        &self,
        collaborators: &Collaborators,
        access: &AccessRequest,
        service: &ExternalService,
        claims: &mut TokenClaims,
    ) -> Result<(), OAuthError> {
        if access.grant_type != self.grant_type() {
            return Ok(());
        }
        match self {
            GrantHandler::ClientCredentials => client_credentials(access, service, claims),
            GrantHandler::JwtBearer => jwt_bearer(collaborators, access, service, claims).await,
        }
    }
}

/// The service acts for itself: claims come from its service account snapshot
fn client_credentials(
    access: &AccessRequest,
    service: &ExternalService,
    claims: &mut TokenClaims,
) -> Result<(), OAuthError> {
    let split = ScopeSplit::new(&access.scopes);
    let identity = &service.signed_in_user;

    if split.profile {
        claims.set_name(&identity.name);
        claims.set_login(&identity.login);
    }
    if split.entitlements {
        let permissions = filter_by_actions(&flatten(&identity.permissions), &split.actions);
        claims.set_entitlements(group_by_action(&permissions));
    }
    Ok(())
}

fn directory_error(err: DirectoryError) -> OAuthError {
    match err {
        DirectoryError::UserNotFound(id) => OAuthError::NotFound(format!("user {id} not found")),
        other => OAuthError::internal("directory lookup failed", other),
    }
}

/// The service acts for a user: claims are bounded by both the user's
/// permissions and the service's impersonate permissions
async fn jwt_bearer(
    collaborators: &Collaborators,
    access: &AccessRequest,
    service: &ExternalService,
    claims: &mut TokenClaims,
) -> Result<(), OAuthError> {
    let subject: Subject = access
        .subject
        .parse()
        .map_err(|e| OAuthError::InvalidRequest(format!("{e}")))?;
    if subject.namespace != Namespace::User {
        return Err(OAuthError::InvalidRequest(format!(
            "subject {subject} is not a user"
        )));
    }
    let user_id = subject.id;

    let impersonate = Permission::new(ACTION_USERS_IMPERSONATE, scope_for("users", "id", user_id));
    let allowed = collaborators
        .access_control
        .evaluate(&service.signed_in_user, &impersonate)
        .await
        .map_err(|e| OAuthError::internal("failed to evaluate impersonation", e))?;
    if !allowed {
        return Err(OAuthError::RestrictedAccess(format!(
            "client is not allowed to impersonate user {user_id}"
        )));
    }

    let split = ScopeSplit::new(&access.scopes);
    let user = collaborators
        .users
        .get_by_id(user_id)
        .await
        .map_err(directory_error)?;
    let teams = if split.needs_teams() {
        collaborators
            .users
            .get_teams_by_user(user_id)
            .await
            .map_err(directory_error)?
    } else {
        Vec::new()
    };

    if split.profile {
        claims.set_name(&user.name);
        claims.set_login(&user.login);
    }
    if split.email {
        claims.set_email(&user.email);
    }
    if split.groups {
        claims.set_groups(teams.iter().map(|t| t.name.clone()).collect());
    }
    if split.entitlements {
        let user_permissions = collaborators
            .access_control
            .search_user_permissions(user_id, &split.actions)
            .await
            .map_err(directory_error)?;
        let team_ids: Vec<i64> = teams.iter().map(|t| t.id).collect();
        let client_permissions = rewrite_self_scopes(
            &filter_by_actions(&service.client.impersonate_permissions, &split.actions),
            user_id,
            &team_ids,
        );
        let granted = intersect(&user_permissions, &client_permissions);
        debug!(
            "Impersonation of user {} by client_id={} grants {} permissions",
            user_id,
            service.client_id(),
            granted.len()
        );
        claims.set_entitlements(group_by_action(&granted));
    }
    Ok(())
}
