//! Short code -> destination URL cache used in front of the link store.
//!
//! The cache is never authoritative. Callers on the redirect path treat an
//! `Err` exactly like a miss and fall through to the database.

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};

mod memory;
mod redis_cache;

pub use memory::MemoryCache;
pub use redis_cache::RedisCache;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

#[async_trait]
pub trait LinkCache: Send + Sync {
    /// `Ok(None)` covers both "never cached" and "expired".
    async fn get(&self, code: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, code: &str, url: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn invalidate(&self, code: &str) -> Result<(), CacheError>;

    /// Backend name for startup logs.
    fn backend(&self) -> &'static str;
}

/// Pick the cache backend: Redis when a URL is configured and reachable,
/// otherwise the in-process map.
pub async fn from_config(redis_url: Option<&str>) -> Arc<dyn LinkCache> {
    let cache: Arc<dyn LinkCache> = match redis_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                tracing::warn!(
                    "Redis unavailable at {} ({}); using in-memory cache",
                    url,
                    e
                );
                Arc::new(MemoryCache::new())
            }
        },
        None => Arc::new(MemoryCache::new()),
    };

    tracing::info!("Link cache backend: {}", cache.backend());
    cache
}
