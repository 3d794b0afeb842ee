pub(crate) use crate::config::cache::{CacheConfig, CacheStore};
pub(crate) use crate::config::database::DatabaseConfig;
pub(crate) use crate::config::oauth::{KeyAlgorithm, OAuthConfig};
use confique::Config;

pub mod cache;
pub mod database;
pub mod oauth;

/// Environment variable pointing at an optional TOML configuration file
const CONFIG_FILE_ENV: &str = "OAS_CONFIG_FILE";

/// Main configuration structure for the OAuth server
#[derive(Debug, Config, Clone)]
pub struct ServerConfig {
    /// API key guarding the client registration endpoints
    #[config(env = "OAS_API_KEY", default = "")]
    pub api_key: String,

    /// The port the OAuth server will listen to (default: 7780)
    #[config(env = "OAS_PORT", default = 7780)]
    pub port: u16,

    /// Optional JSON file used to seed the bundled in-memory user directory
    #[config(env = "OAS_DIRECTORY_SEED_PATH")]
    pub directory_seed_path: Option<String>,

    /// OAuth 2.0 token issuance configuration
    #[config(nested)]
    pub oauth: OAuthConfig,

    /// Client store configuration
    #[config(nested)]
    pub database: DatabaseConfig,

    /// External service cache configuration
    #[config(nested)]
    pub cache: CacheConfig,
}

impl ServerConfig {
    /// Loads the configuration from environment variables, then from the
    /// TOML file named by `OAS_CONFIG_FILE` (if any), then from defaults
    pub fn new() -> Result<Self, String> {
        let mut builder = ServerConfig::builder().env();
        if let Ok(path) = std::env::var(CONFIG_FILE_ENV) {
            builder = builder.file(path);
        }
        builder.load().map_err(|e| e.to_string())
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self {
            api_key: "test_api_key".to_string(),
            port: 0, // Let the OS choose a port
            directory_seed_path: None,
            oauth: OAuthConfig {
                issuer: "http://localhost:7780".to_string(),
                token_ttl: 3600,
                request_timeout: 5,
                signing_key_path: None,
                signing_key_algorithm: KeyAlgorithm::Ecdsa,
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            cache: CacheConfig {
                ttl: 60,
                store: CacheStore::InMemory,
                memory_capacity: 16,
            },
        }
    }
}
