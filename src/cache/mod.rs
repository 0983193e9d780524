//! Best-effort balance cache.
//!
//! The cache only accelerates reads. It is never the system of record and
//! every failure is absorbed by the caller.

mod memory;
mod redis;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::UserId;

pub use self::memory::MemoryCache;
pub use self::redis::RedisCache;

/// Default lifetime of a cached balance.
pub const DEFAULT_BALANCE_TTL: Duration = Duration::from_secs(5);

/// Cache key for a user's serialized wallet.
pub fn balance_key(user_id: UserId) -> String {
    format!("wallet:balance:{}", user_id)
}

#[async_trait]
pub trait BalanceCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<()>;

    async fn delete(&self, keys: &[String]) -> Result<()>;
}

/// A cache that stores nothing. Every read misses.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoCache;

#[async_trait]
impl BalanceCache for NoCache {
    async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _keys: &[String]) -> Result<()> {
        Ok(())
    }
}
