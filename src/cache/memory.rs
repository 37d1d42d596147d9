use super::{CacheError, LinkCache};
use async_trait::async_trait;
use dashmap::DashMap;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

#[derive(Debug, Clone)]
struct Entry {
    url: String,
    expires_at: Instant,
}

/// Thread-safe in-memory cache mapping short_code -> original_url.
///
/// Backed by a DashMap so reads are concurrent and lock-free for most cases.
/// Every entry carries its own deadline; an expired entry reads as a miss and
/// is evicted on that read.
#[derive(Clone, Debug, Default)]
pub struct MemoryCache {
    inner: Arc<DashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinkCache for MemoryCache {
    async fn get(&self, code: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        let expired = match self.inner.get(code) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.url.clone())),
            Some(_) => true,
            None => false,
        };

        if expired {
            self.inner.remove_if(code, |_, entry| entry.expires_at <= now);
        }
        Ok(None)
    }

    async fn set(&self, code: &str, url: &str, ttl: Duration) -> Result<(), CacheError> {
        self.inner.insert(
            code.to_owned(),
            Entry {
                url: url.to_owned(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn invalidate(&self, code: &str) -> Result<(), CacheError> {
        self.inner.remove(code);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get() {
        let cache = MemoryCache::new();
        cache
            .set("abc12345", "https://example.com", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            cache.get("abc12345").await.unwrap().as_deref(),
            Some("https://example.com")
        );
        assert_eq!(cache.get("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn expired_entries_read_as_miss_and_are_evicted() {
        let cache = MemoryCache::new();
        cache
            .set("abc12345", "https://example.com", Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(cache.get("abc12345").await.unwrap(), None);
        assert!(cache.inner.is_empty());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = MemoryCache::new();
        cache
            .set("abc12345", "https://example.com", Duration::from_secs(60))
            .await
            .unwrap();
        cache.invalidate("abc12345").await.unwrap();

        assert_eq!(cache.get("abc12345").await.unwrap(), None);
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let cache = MemoryCache::new();
        cache
            .set("abc12345", "https://one.example", Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("abc12345", "https://two.example", Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(
            cache.get("abc12345").await.unwrap().as_deref(),
            Some("https://two.example")
        );
    }
}
