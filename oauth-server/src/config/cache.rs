use confique::Config;
use serde::Deserialize;

/// Specifies which cache store implementation backs the external service registry
#[derive(Debug, Deserialize, Clone, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStore {
    #[default]
    InMemory,
    #[serde(other)]
    None,
}

/// Configuration for the external service cache
#[derive(Debug, Config, Clone)]
pub struct CacheConfig {
    /// Cache TTL in seconds (default: 5 minutes)
    #[config(env = "OAS_CACHE_TTL", default = 300)]
    pub ttl: u64,

    /// Cache store type: "in-memory" (default) or "none"
    #[config(env = "OAS_CACHE_STORE", default = "in-memory")]
    pub store: CacheStore,

    /// Maximum in-memory cache size in MiB (default: 64 MiB)
    #[config(env = "OAS_CACHE_MEMORY_CAPACITY", default = 64)]
    pub memory_capacity: usize,
}
