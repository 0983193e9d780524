//! Short-lived named locks keyed by wallet id.
//!
//! Transfers take the locks of both wallets in ascending wallet-id order so
//! two transfers over an overlapping pair never wait on each other in a
//! cycle. Acquisition is try-once; contention is reported to the caller.

mod guard;
mod memory;
mod redis;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::WalletId;

pub use self::guard::{LockGuard, PairGuard};
pub use self::memory::MemoryLock;
pub use self::redis::RedisLock;

/// Default expiry of a wallet lock. Must exceed the time a transfer holds it.
pub const DEFAULT_LOCK_TTL: Duration = Duration::from_secs(10);

/// Lock name for a wallet.
pub fn lock_name(wallet_id: WalletId) -> String {
    format!("lock:wallet:{}", wallet_id)
}

/// Proof of ownership of a held lock. Only the holder's token releases it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockToken(String);

impl LockToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
pub trait NamedLock: Send + Sync {
    /// Try once to take `name` for at most `ttl`. `None` means someone else
    /// holds it.
    async fn try_acquire(&self, name: &str, ttl: Duration) -> Result<Option<LockToken>>;

    /// Release `name` if it is still held with `token`. Releasing a lock that
    /// expired or changed hands is a no-op.
    async fn release(&self, name: &str, token: &LockToken) -> Result<()>;
}
