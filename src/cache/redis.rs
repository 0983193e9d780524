use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::debug;

use super::BalanceCache;

/// Balance cache shared between nodes through Redis.
#[derive(Clone)]
pub struct RedisCache {
    redis: ConnectionManager,
}

impl RedisCache {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("Invalid Redis URL")?;
        let redis = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self::new(redis))
    }
}

#[async_trait]
impl BalanceCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let value: Option<Vec<u8>> = self
            .redis
            .clone()
            .get(key)
            .await
            .with_context(|| format!("Redis GET {} failed", key))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()> {
        // Redis rejects EX 0, so sub-second TTLs round up.
        let seconds = ttl.as_secs().max(1);
        let mut conn = self.redis.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(seconds)
            .query_async::<_, ()>(&mut conn)
            .await
            .with_context(|| format!("Redis SET {} failed", key))?;
        debug!(key, seconds, "cached balance");
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.redis.clone();
        redis::cmd("DEL")
            .arg(keys)
            .query_async::<_, ()>(&mut conn)
            .await
            .context("Redis DEL failed")?;
        Ok(())
    }
}
