use crate::config::{CacheConfig, CacheStore};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod memory;
pub mod null;

/// Errors that can occur during cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse value: {0}")]
    Deserialization(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Interface shared by every cache backend.
///
/// Values are stored serialized, so every read hands out a fresh copy and
/// cached entries can never be mutated through a returned value.
#[async_trait::async_trait]
pub trait CacheBackend: Send + Sync {
    /// Store a value in the cache with the configured TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T)
        -> Result<(), CacheError>;

    /// Retrieve a value from the cache
    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError>;

    /// Returns Ok(()) if healthy, or Err with a descriptive message if unhealthy.
    async fn health_check(&self) -> Result<(), String>;

    /// Delete a value from the cache
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Cache backend selected at startup from configuration
#[derive(Clone)]
pub enum Cache {
    /// In-memory cache implementation using Moka
    InMemory(memory::InMemoryCache),
    /// No-op cache implementation that doesn't actually cache anything
    Null(null::NullCache),
}

#[async_trait::async_trait]
impl CacheBackend for Cache {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), CacheError> {
        match self {
            Self::InMemory(cache) => cache.set(key, value).await,
            Self::Null(cache) => cache.set(key, value).await,
        }
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, CacheError> {
        match self {
            Self::InMemory(cache) => cache.get(key).await,
            Self::Null(cache) => cache.get(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(cache) => cache.health_check().await,
            Self::Null(cache) => cache.health_check().await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        match self {
            Self::InMemory(cache) => cache.delete(key).await,
            Self::Null(cache) => cache.delete(key).await,
        }
    }
}

/// Builds the cache backend named by the configuration
pub fn create_cache(config: &CacheConfig) -> Result<Cache, CacheError> {
    match config.store {
        CacheStore::InMemory => {
            let cache = memory::InMemoryCache::new(config.ttl, config.memory_capacity)
                .map_err(CacheError::Config)?;
            Ok(Cache::InMemory(cache))
        }
        CacheStore::None => Ok(Cache::Null(null::NullCache::new())),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cache::memory::InMemoryCache;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct CachedClient {
        client_id: String,
        scopes: Vec<String>,
    }

    fn cached(client_id: &str) -> CachedClient {
        CachedClient {
            client_id: client_id.to_string(),
            scopes: vec!["profile".to_string()],
        }
    }

    #[tokio::test]
    async fn test_cache_basic_operations() {
        let cache = Cache::InMemory(InMemoryCache::new(60, 16).expect("Failed to create cache"));

        cache
            .set("client-1", &cached("client-1"))
            .await
            .expect("Failed to set value");
        let value: Option<CachedClient> = cache.get("client-1").await.expect("Failed to get value");
        assert_eq!(value, Some(cached("client-1")));

        let value: Option<CachedClient> = cache.get("client-2").await.expect("Failed to get value");
        assert_eq!(value, None);

        cache.delete("client-1").await.expect("Failed to delete value");
        let value: Option<CachedClient> = cache.get("client-1").await.expect("Failed to get value");
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_cache_ttl() {
        let cache = Cache::InMemory(InMemoryCache::new(1, 16).expect("Failed to create cache"));
        cache
            .set("client-1", &cached("client-1"))
            .await
            .expect("Failed to set value");
        assert!(cache.get::<CachedClient>("client-1").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(cache.get::<CachedClient>("client-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_are_independent_copies() {
        let cache = Cache::InMemory(InMemoryCache::new(60, 16).expect("Failed to create cache"));
        cache.set("client-1", &cached("client-1")).await.unwrap();

        let mut first: CachedClient = cache.get("client-1").await.unwrap().unwrap();
        first.scopes.push("entitlements".to_string());
        let second: CachedClient = cache.get("client-1").await.unwrap().unwrap();
        assert_eq!(second, cached("client-1"));
    }

    #[tokio::test]
    async fn test_create_cache_from_config() {
        let mut config = CacheConfig {
            ttl: 60,
            store: CacheStore::None,
            memory_capacity: 16,
        };
        let cache = create_cache(&config).unwrap();
        assert!(matches!(cache, Cache::Null(_)));
        cache.set("client-1", &cached("client-1")).await.unwrap();
        assert!(cache.get::<CachedClient>("client-1").await.unwrap().is_none());

        config.store = CacheStore::InMemory;
        assert!(matches!(create_cache(&config).unwrap(), Cache::InMemory(_)));
    }
}
