//! Claim accumulation for issued access tokens

use crate::models::external_service::{
    SCOPE_EMAIL, SCOPE_ENTITLEMENTS, SCOPE_GROUPS, SCOPE_PROFILE,
};
use crate::models::permission::ACTION_TEAMS_READ;
use crate::models::PermissionMap;
use serde_json::{Map, Value};

pub const CLAIM_NAME: &str = "name";
pub const CLAIM_LOGIN: &str = "login";
pub const CLAIM_EMAIL: &str = "email";
pub const CLAIM_GROUPS: &str = "groups";
pub const CLAIM_ENTITLEMENTS: &str = "entitlements";

/// Requested scopes split into the claims they ask for and the RBAC actions
/// filtering the entitlements
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScopeSplit {
    pub profile: bool,
    pub email: bool,
    pub groups: bool,
    pub entitlements: bool,
    pub actions: Vec<String>,
}

impl ScopeSplit {
    pub fn new(scopes: &[String]) -> Self {
        let mut split = Self::default();
        for scope in scopes {
            match scope.as_str() {
                SCOPE_PROFILE => split.profile = true,
                SCOPE_EMAIL => split.email = true,
                SCOPE_GROUPS => split.groups = true,
                SCOPE_ENTITLEMENTS => split.entitlements = true,
                action => {
                    if !split.actions.iter().any(|a| a == action) {
                        split.actions.push(action.to_string());
                    }
                }
            }
        }
        split
    }

    /// Whether composing the claims requires the user's teams
    pub fn needs_teams(&self) -> bool {
        self.groups
            || (self.entitlements
                && (self.actions.is_empty() || self.actions.iter().any(|a| a == ACTION_TEAMS_READ)))
    }
}

/// Claims accumulated by the grant handlers for one token request.
///
/// Setters skip empty strings, so absent values are never emitted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenClaims {
    claims: Map<String, Value>,
}

impl TokenClaims {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_string(&mut self, key: &str, value: &str) {
        if !value.is_empty() {
            self.claims
                .insert(key.to_string(), Value::String(value.to_string()));
        }
    }

    pub fn set_name(&mut self, name: &str) {
        self.set_string(CLAIM_NAME, name);
    }

    pub fn set_login(&mut self, login: &str) {
        self.set_string(CLAIM_LOGIN, login);
    }

    pub fn set_email(&mut self, email: &str) {
        self.set_string(CLAIM_EMAIL, email);
    }

    pub fn set_groups(&mut self, groups: Vec<String>) {
        self.claims.insert(
            CLAIM_GROUPS.to_string(),
            Value::Array(groups.into_iter().map(Value::String).collect()),
        );
    }

    /// Sets the action to scopes map, emitted even when empty
    pub fn set_entitlements(&mut self, entitlements: PermissionMap) {
        let map = entitlements
            .into_iter()
            .map(|(action, scopes)| {
                (
                    action,
                    Value::Array(scopes.into_iter().map(Value::String).collect()),
                )
            })
            .collect();
        self.claims
            .insert(CLAIM_ENTITLEMENTS.to_string(), Value::Object(map));
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.claims
    }
}
