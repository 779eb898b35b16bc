use autox_cache::{CacheConfig, SqliteCache};
use autox_client::CollectionCache;
use autox_core::cache::NoCache;
use autox_core::config::ProviderConfig;
use autox_core::models::Query;
use autox_core::traits::ResponseCache;
use autox_core::AppError;
use serde_json::Value;

/// The response cache picked from configuration.
pub enum AnyCache {
    Disabled(NoCache),
    Local(SqliteCache),
    Remote(CollectionCache),
}

impl AnyCache {
    /// Remote when `cache_remote` is set, else local when a cache path is
    /// set, else disabled.
    pub async fn from_config(config: &ProviderConfig, storage_url: &str) -> Result<Self, AppError> {
        if config.cache_remote {
            return Ok(AnyCache::Remote(CollectionCache::from_config(config, storage_url)?));
        }
        match CacheConfig::from_provider(config) {
            Some(local) => Ok(AnyCache::Local(SqliteCache::open(&local).await?)),
            None => Ok(AnyCache::Disabled(NoCache)),
        }
    }

    pub async fn describe(&self) -> Result<String, AppError> {
        match self {
            AnyCache::Disabled(cache) => Ok(cache.to_string()),
            AnyCache::Local(cache) => cache.summary().await,
            AnyCache::Remote(cache) => Ok(cache.to_string()),
        }
    }
}

impl ResponseCache for AnyCache {
    fn fingerprint(&self, query: &Query) -> String {
        match self {
            AnyCache::Disabled(cache) => cache.fingerprint(query),
            AnyCache::Local(cache) => cache.fingerprint(query),
            AnyCache::Remote(cache) => cache.fingerprint(query),
        }
    }

    async fn get(&self, fingerprint: &str) -> Result<Option<Value>, AppError> {
        match self {
            AnyCache::Disabled(cache) => cache.get(fingerprint).await,
            AnyCache::Local(cache) => cache.get(fingerprint).await,
            AnyCache::Remote(cache) => cache.get(fingerprint).await,
        }
    }

    async fn set(&self, fingerprint: &str, value: &Value) -> Result<(), AppError> {
        match self {
            AnyCache::Disabled(cache) => cache.set(fingerprint, value).await,
            AnyCache::Local(cache) => cache.set(fingerprint, value).await,
            AnyCache::Remote(cache) => cache.set(fingerprint, value).await,
        }
    }

    async fn close(&self) -> Result<(), AppError> {
        match self {
            AnyCache::Disabled(cache) => cache.close().await,
            AnyCache::Local(cache) => cache.close().await,
            AnyCache::Remote(cache) => cache.close().await,
        }
    }
}
