use confique::Config;

/// Configuration for the SQL client store
#[derive(Debug, Config, Clone)]
pub struct DatabaseConfig {
    /// SQLite connection string (default: sqlite::memory:)
    #[config(env = "OAS_DATABASE_URL", default = "sqlite::memory:")]
    pub url: String,

    /// Maximum number of pooled connections (default: 5)
    #[config(env = "OAS_DATABASE_MAX_CONNECTIONS", default = 5)]
    pub max_connections: u32,
}
