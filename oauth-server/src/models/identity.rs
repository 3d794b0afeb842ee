use crate::models::permission::{Permission, PermissionMap};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use utoipa::ToSchema;

/// Namespace part of a subject identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    User,
    ServiceAccount,
}

impl Namespace {
    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::User => "user",
            Namespace::ServiceAccount => "service-account",
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid subject '{0}', expected <namespace>:id:<integer>")]
pub struct SubjectParseError(String);

/// Token subject of the form `<namespace>:id:<integer>`, e.g. `user:id:56`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subject {
    pub namespace: Namespace,
    pub id: i64,
}

impl Subject {
    pub fn user(id: i64) -> Self {
        Self {
            namespace: Namespace::User,
            id,
        }
    }

    pub fn service_account(id: i64) -> Self {
        Self {
            namespace: Namespace::ServiceAccount,
            id,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:id:{}", self.namespace.as_str(), self.id)
    }
}

impl FromStr for Subject {
    type Err = SubjectParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SubjectParseError(s.to_string());
        let (namespace, id) = s.split_once(":id:").ok_or_else(invalid)?;
        let namespace = match namespace {
            "user" => Namespace::User,
            "service-account" => Namespace::ServiceAccount,
            _ => return Err(invalid()),
        };
        let id = id.parse::<i64>().map_err(|_| invalid())?;
        if id <= 0 {
            return Err(invalid());
        }
        Ok(Self { namespace, id })
    }
}

/// Identity snapshot of an external service's backing service account.
///
/// Built once per cache fill and used for self-grant claims and for
/// evaluating the impersonation right.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SignedInUser {
    /// Service account id, 0 when the service has no backing identity
    pub user_id: i64,
    pub login: String,
    pub name: String,
    pub role: String,
    /// Action to scopes map of everything the service account may do
    pub permissions: PermissionMap,
}

/// Service account as exposed by the service accounts collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccountProfile {
    pub id: i64,
    pub login: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub disabled: bool,
}

/// Command creating, updating or removing the service account backing an external service
#[derive(Debug, Clone, PartialEq)]
pub struct ManageServiceAccountCmd {
    /// Slug of the external service, used to derive the service account login
    pub service_slug: String,
    /// Whether the service may act on its own behalf
    pub enabled: bool,
    /// Permissions granted to the service account; empty removes the account
    pub permissions: Vec<Permission>,
}

/// End user of the host system, the target of impersonation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Team {
    pub id: i64,
    pub name: String,
}

/// Lowercase, dash separated form of an external service name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}
