use crate::keys::{ClientPublicKey, KeyError};
use crate::models::OAuthClient;
use async_trait::async_trait;
use thiserror::Error;

pub mod sqlite;

pub use sqlite::SqlStore;

/// Errors that can occur while reading or writing external services
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("External service not found: {0}")]
    NotFound(String),
    #[error("External service already exists: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),
    #[error("Invalid stored key: {0}")]
    Key(#[from] KeyError),
}

/// Persistence of external service clients and their impersonate permissions.
///
/// Writes touching several tables run in a single transaction.
#[async_trait]
pub trait ExternalServiceStore: Send + Sync {
    /// Inserts a new client, failing with [`StoreError::Conflict`] when the
    /// name or client id is taken
    async fn register_external_service(
        &self,
        client: &OAuthClient,
    ) -> Result<OAuthClient, StoreError>;

    /// Upserts a client by name, replacing its impersonate permissions wholesale.
    ///
    /// An existing client keeps its stored client id and secret; the returned
    /// client carries the values actually persisted.
    async fn save_external_service(&self, client: &OAuthClient)
        -> Result<OAuthClient, StoreError>;

    async fn get_external_service(&self, client_id: &str) -> Result<OAuthClient, StoreError>;

    async fn get_external_service_by_name(&self, name: &str) -> Result<OAuthClient, StoreError>;

    /// Public key registered to verify the client's assertions
    async fn get_external_service_public_key(
        &self,
        client_id: &str,
    ) -> Result<ClientPublicKey, StoreError>;

    async fn get_external_service_names(&self) -> Result<Vec<String>, StoreError>;

    async fn delete_external_service(&self, client_id: &str) -> Result<(), StoreError>;

    /// Returns Ok(()) if the backing database answers queries
    async fn health_check(&self) -> Result<(), String>;
}
