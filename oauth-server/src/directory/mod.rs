//! Host system collaborators: access control, user directory and service accounts

use crate::models::{
    ManageServiceAccountCmd, Permission, ServiceAccountProfile, SignedInUser, Team, User,
};
use async_trait::async_trait;
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryDirectory;

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("User not found: {0}")]
    UserNotFound(i64),
    #[error("Service account not found: {0}")]
    ServiceAccountNotFound(i64),
    #[error("Directory backend error: {0}")]
    Backend(String),
}

/// RBAC evaluator of the host system
#[async_trait]
pub trait AccessControl: Send + Sync {
    /// Whether `user` holds `permission`, wildcard scopes included
    async fn evaluate(
        &self,
        user: &SignedInUser,
        permission: &Permission,
    ) -> Result<bool, DirectoryError>;

    /// Permissions of a user restricted to the given actions, all of them
    /// when `actions` is empty
    async fn search_user_permissions(
        &self,
        user_id: i64,
        actions: &[String],
    ) -> Result<Vec<Permission>, DirectoryError>;

    /// Every permission granted to a user or service account
    async fn get_user_permissions(&self, user_id: i64) -> Result<Vec<Permission>, DirectoryError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_by_id(&self, user_id: i64) -> Result<User, DirectoryError>;

    async fn get_teams_by_user(&self, user_id: i64) -> Result<Vec<Team>, DirectoryError>;
}

#[async_trait]
pub trait ServiceAccounts: Send + Sync {
    /// Creates, updates or removes the service account backing an external
    /// service. Returns the account id, or 0 when the account was removed.
    async fn manage_service_account(
        &self,
        current_id: i64,
        cmd: &ManageServiceAccountCmd,
    ) -> Result<i64, DirectoryError>;

    async fn retrieve_profile(&self, id: i64) -> Result<ServiceAccountProfile, DirectoryError>;
}
