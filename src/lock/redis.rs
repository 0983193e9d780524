use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;

use super::{LockToken, NamedLock};

/// Deletes the key only if it still holds our token.
const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Named locks shared between nodes: `SET name token NX PX ttl`.
#[derive(Clone)]
pub struct RedisLock {
    redis: ConnectionManager,
    release: Script,
}

impl RedisLock {
    pub fn new(redis: ConnectionManager) -> Self {
        Self {
            redis,
            release: Script::new(RELEASE_SCRIPT),
        }
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
impl NamedLock for RedisLock {
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>> {
        let token = LockToken::generate();
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.redis.clone();

        // SET NX replies OK when set and nil when the key exists
        let reply: Option<String> = redis::cmd("SET")
            .arg(name)
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(millis)
            .query_async(&mut conn)
            .await
            .with_context(|| format!("Redis SET NX {} failed", name))?;

        Ok(reply.map(|_| token))
    }

    async fn release(&self, name: &str, token: &LockToken) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: i64 = self
            .release
            .key(name)
            .arg(token.as_str())
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("Redis lock release {} failed", name))?;
        Ok(())
    }
}
