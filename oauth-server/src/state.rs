use crate::cache::create_cache;
use crate::config::ServerConfig;
use crate::directory::{AccessControl, InMemoryDirectory, ServiceAccounts, UserDirectory};
use crate::keys::KeyManager;
use crate::oauth::{Collaborators, ProtocolEngine, TokenDispatcher};
use crate::registry::ExternalServiceRegistry;
use crate::store::SqlStore;
use std::io::{Error, ErrorKind};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub registry: ExternalServiceRegistry,
    pub dispatcher: TokenDispatcher,
}

impl AppState {
    /// Builds the state over the bundled in-memory directory, seeded from
    /// `directory_seed_path` when configured
    pub async fn new(config: &ServerConfig) -> Result<Self, Error> {
        let directory = match &config.directory_seed_path {
            Some(path) => InMemoryDirectory::load(path)
                .await
                .map_err(|e| Error::new(ErrorKind::InvalidData, e.to_string()))?,
            None => InMemoryDirectory::new(),
        };
        Self::with_directory(config, Arc::new(directory)).await
    }

    /// Builds the state over any implementation of the host collaborators
    pub async fn with_directory<D>(config: &ServerConfig, directory: Arc<D>) -> Result<Self, Error>
    where
        D: AccessControl + UserDirectory + ServiceAccounts + 'static,
    {
        let store = SqlStore::connect(&config.database)
            .await
            .map_err(|e| Error::other(format!("Failed to open client store: {e}")))?;
        let cache = create_cache(&config.cache)
            .map_err(|e| Error::other(format!("Failed to create cache: {e}")))?;
        let keys = KeyManager::new(
            config.oauth.signing_key_path.as_deref(),
            config.oauth.signing_key_algorithm,
        )
        .map_err(|e| Error::other(format!("Failed to load signing key: {e}")))?;

        let access_control: Arc<dyn AccessControl> = directory.clone();
        let service_accounts: Arc<dyn ServiceAccounts> = directory.clone();
        let users: Arc<dyn UserDirectory> = directory;

        let registry = ExternalServiceRegistry::new(
            Arc::new(store),
            cache,
            access_control.clone(),
            service_accounts,
        );
        let engine = ProtocolEngine::new(config.oauth.clone(), Arc::new(keys));
        let dispatcher = TokenDispatcher::new(
            registry.clone(),
            engine,
            Collaborators {
                access_control,
                users,
            },
            Duration::from_secs(config.oauth.request_timeout),
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            registry,
            dispatcher,
        })
    }

    /// Check if all components are healthy
    pub async fn health_check(&self) -> bool {
        self.registry.store_health().await.is_ok() && self.registry.cache_health().await.is_ok()
    }
}
