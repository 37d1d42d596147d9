use super::{CacheError, LinkCache};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use std::time::Duration;

const KEY_PREFIX: &str = "url:";

/// Redis-backed cache shared between service instances.
///
/// `ConnectionManager` multiplexes one connection and reconnects on its own,
/// so a clone per call is all the pooling needed.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect and verify the server answers PING.
    pub async fn connect(redis_url: &str) -> Result<Self, CacheError> {
        let client = Client::open(redis_url)?;
        let mut conn = ConnectionManager::new(client).await?;
        redis::cmd("PING").query_async::<()>(&mut conn).await?;

        tracing::info!("Connected to Redis at {}", redis_url);
        Ok(Self { conn })
    }

    fn key(code: &str) -> String {
        format!("{KEY_PREFIX}{code}")
    }
}

#[async_trait]
impl LinkCache for RedisCache {
    async fn get(&self, code: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let url: Option<String> = conn.get(Self::key(code)).await?;
        Ok(url)
    }

    async fn set(&self, code: &str, url: &str, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        // SET EX rejects 0; sub-second TTLs round up to one second.
        let seconds = ttl.as_secs().max(1);
        conn.set_ex::<_, _, ()>(Self::key(code), url, seconds)
            .await?;
        Ok(())
    }

    async fn invalidate(&self, code: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(Self::key(code)).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
