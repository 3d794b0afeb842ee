//! External service (OAuth 2.0 client) records, registration forms and DTOs

use crate::keys::KeyAlgorithm;
use crate::models::identity::{SignedInUser, Subject};
use crate::models::permission::{
    Permission, ACTION_TEAMS_READ, ACTION_USERS_PERMISSIONS_READ, ACTION_USERS_READ,
    SCOPE_GLOBAL_USERS_SELF, SCOPE_TEAMS_SELF, SCOPE_USERS_SELF,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;

/// Service account id of an external service without backing identity
pub const NO_SERVICE_ACCOUNT_ID: i64 = 0;

pub const SCOPE_PROFILE: &str = "profile";
pub const SCOPE_EMAIL: &str = "email";
pub const SCOPE_GROUPS: &str = "groups";
pub const SCOPE_ENTITLEMENTS: &str = "entitlements";

/// OAuth scopes naming token claims rather than RBAC actions
pub const CLAIM_SCOPES: [&str; 4] = [SCOPE_PROFILE, SCOPE_EMAIL, SCOPE_GROUPS, SCOPE_ENTITLEMENTS];

/// Grant types the token endpoint knows how to serve
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub enum GrantType {
    /// The client acts on its own behalf
    #[serde(rename = "client_credentials")]
    ClientCredentials,
    /// The client impersonates a user with a signed assertion (RFC 7523)
    #[serde(rename = "urn:ietf:params:oauth:grant-type:jwt-bearer")]
    JwtBearer,
}

impl GrantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::JwtBearer => "urn:ietf:params:oauth:grant-type:jwt-bearer",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "client_credentials" => Some(GrantType::ClientCredentials),
            "urn:ietf:params:oauth:grant-type:jwt-bearer" => Some(GrantType::JwtBearer),
            _ => None,
        }
    }
}

impl fmt::Display for GrantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client row as persisted by the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthClient {
    /// Store generated row id, 0 before the first insert
    pub id: i64,
    pub name: String,
    pub client_id: String,
    /// SHA-256 digest of the client secret, hex encoded
    pub secret: String,
    pub grant_types: Vec<GrantType>,
    pub audiences: Vec<String>,
    pub redirect_uri: Option<String>,
    /// PEM public key verifying the JWT-bearer assertions the client signs
    pub public_pem: Option<String>,
    pub service_account_id: i64,
    /// Ceiling of what the client may request on behalf of a user
    pub impersonate_permissions: Vec<Permission>,
}

impl OAuthClient {
    pub fn supports(&self, grant_type: GrantType) -> bool {
        self.grant_types.contains(&grant_type)
    }

    pub fn to_dto(&self) -> ClientDTO {
        ClientDTO {
            name: self.name.clone(),
            id: self.client_id.clone(),
            secret: None,
            grant_types: self.grant_types.clone(),
            audiences: self.audiences.clone(),
            redirect_uri: self.redirect_uri.clone(),
            key: self.public_pem.as_ref().map(|pem| KeyResult {
                public_pem: pem.clone(),
                private_pem: None,
                generated: false,
            }),
        }
    }
}

/// Fully hydrated external service: the client row plus its service account identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalService {
    pub client: OAuthClient,
    /// Permissions of the backing service account, empty when there is none
    pub self_permissions: Vec<Permission>,
    pub signed_in_user: SignedInUser,
}

impl ExternalService {
    pub fn client_id(&self) -> &str {
        &self.client.client_id
    }

    /// Subject of tokens the service obtains on its own behalf
    pub fn subject(&self) -> Subject {
        Subject::service_account(self.client.service_account_id)
    }

    /// Scopes the service may request for itself: the claim scopes plus
    /// every action its service account holds
    pub fn scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = CLAIM_SCOPES.iter().map(|s| s.to_string()).collect();
        scopes.extend(self.signed_in_user.permissions.keys().cloned());
        scopes
    }

    /// Scopes the service may request while impersonating a user.
    ///
    /// The claims-support permissions added at registration unlock the
    /// matching claim scopes, every other permission unlocks its action.
    pub fn impersonate_scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::new();
        for permission in &self.client.impersonate_permissions {
            let unlocked: &[&str] = match (permission.action.as_str(), permission.scope.as_str()) {
                (ACTION_USERS_READ, SCOPE_GLOBAL_USERS_SELF) => {
                    &[SCOPE_PROFILE, SCOPE_EMAIL, ACTION_USERS_READ]
                }
                (ACTION_USERS_PERMISSIONS_READ, SCOPE_USERS_SELF) => {
                    &[SCOPE_ENTITLEMENTS, ACTION_USERS_PERMISSIONS_READ]
                }
                (ACTION_TEAMS_READ, SCOPE_TEAMS_SELF) => &[SCOPE_GROUPS, ACTION_TEAMS_READ],
                (action, _) => {
                    if !scopes.iter().any(|s| s == action) {
                        scopes.push(action.to_string());
                    }
                    continue;
                }
            };
            for scope in unlocked {
                if !scopes.iter().any(|s| s == scope) {
                    scopes.push(scope.to_string());
                }
            }
        }
        scopes
    }
}

/// What the service may do on its own behalf
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct SelfCfg {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// What the service may do on behalf of a user
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ImpersonationCfg {
    #[serde(default)]
    pub enabled: bool,
    /// Whether the service needs the `groups` claim of impersonated users
    #[serde(default)]
    pub groups: bool,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

/// How the key verifying the client's assertions is provisioned
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct KeyOption {
    /// Generate a fresh key pair and hand out the private key once
    #[serde(default)]
    pub generate: bool,
    /// Algorithm of the generated key pair (default: ecdsa)
    #[serde(default)]
    pub algorithm: Option<KeyAlgorithm>,
    /// PEM encoded public key supplied by the client
    #[serde(default)]
    pub public_pem: Option<String>,
    /// JWKS URL of the client, not supported
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct OAuthProviderCfg {
    #[serde(default)]
    pub redirect_uri: Option<String>,
    #[serde(default)]
    pub audiences: Vec<String>,
    #[serde(default)]
    pub key: Option<KeyOption>,
}

/// Registration form of an external service, upserted by name
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ExternalServiceRegistration {
    pub name: String,
    #[serde(rename = "self", default)]
    pub self_cfg: SelfCfg,
    #[serde(default)]
    pub impersonation: ImpersonationCfg,
    #[serde(default)]
    pub oauth: OAuthProviderCfg,
}

/// Key material returned by a registration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct KeyResult {
    pub public_pem: String,
    /// Only present right after the key pair was generated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_pem: Option<String>,
    #[serde(default)]
    pub generated: bool,
}

/// Client as returned by the registration endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientDTO {
    pub name: String,
    /// OAuth client id
    pub id: String,
    /// Plaintext secret, only present in the response creating the client
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub grant_types: Vec<GrantType>,
    #[serde(default)]
    pub audiences: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<KeyResult>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with_impersonation(permissions: Vec<Permission>) -> ExternalService {
        ExternalService {
            client: OAuthClient {
                id: 1,
                name: "plugin".to_string(),
                client_id: "client-1".to_string(),
                secret: String::new(),
                grant_types: vec![GrantType::JwtBearer],
                audiences: vec![],
                redirect_uri: None,
                public_pem: None,
                service_account_id: 2,
                impersonate_permissions: permissions,
            },
            self_permissions: vec![],
            signed_in_user: SignedInUser::default(),
        }
    }

    #[test]
    fn test_grant_type_serialization() {
        assert_eq!(
            serde_json::to_string(&GrantType::JwtBearer).unwrap(),
            "\"urn:ietf:params:oauth:grant-type:jwt-bearer\""
        );
        assert_eq!(
            GrantType::parse("client_credentials"),
            Some(GrantType::ClientCredentials)
        );
        assert_eq!(GrantType::parse("authorization_code"), None);
    }

    #[test]
    fn test_impersonate_scopes() {
        let service = service_with_impersonation(vec![
            Permission::new(ACTION_USERS_READ, SCOPE_GLOBAL_USERS_SELF),
            Permission::new(ACTION_USERS_PERMISSIONS_READ, SCOPE_USERS_SELF),
            Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF),
            Permission::new("dashboards:read", "dashboards:*"),
            Permission::new("dashboards:read", "folders:*"),
        ]);
        assert_eq!(
            service.impersonate_scopes(),
            vec![
                "profile",
                "email",
                "users:read",
                "entitlements",
                "users.permissions:read",
                "groups",
                "teams:read",
                "dashboards:read",
            ]
        );
    }

    #[test]
    fn test_self_scopes_include_claims_and_actions() {
        let mut service = service_with_impersonation(vec![]);
        service
            .signed_in_user
            .permissions
            .insert("dashboards:read".to_string(), vec!["dashboards:*".to_string()]);
        assert_eq!(
            service.scopes(),
            vec!["profile", "email", "groups", "entitlements", "dashboards:read"]
        );
    }

    #[test]
    fn test_registration_form() {
        let registration: ExternalServiceRegistration = serde_json::from_value(serde_json::json!({
            "name": "my-plugin",
            "self": {
                "enabled": true,
                "permissions": [{"action": "dashboards:read", "scope": "dashboards:*"}]
            },
            "impersonation": {"enabled": true, "groups": true},
            "oauth": {"key": {"generate": true, "algorithm": "rsa"}}
        }))
        .unwrap();
        assert!(registration.self_cfg.enabled);
        assert_eq!(registration.self_cfg.permissions.len(), 1);
        assert!(registration.impersonation.groups);
        let key = registration.oauth.key.unwrap();
        assert!(key.generate);
        assert_eq!(key.algorithm, Some(KeyAlgorithm::Rsa));
    }
}
