use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::application::LedgerError;
use crate::domain::WalletId;

use super::{LockToken, NamedLock, lock_name};

/// A held named lock.
///
/// Call [`LockGuard::release`] on the normal path. If the guard is dropped
/// while still held (panic, cancelled request) the release is spawned onto
/// the current tokio runtime; failing that, the lock lapses at its expiry.
pub struct LockGuard {
    locks: Arc<dyn NamedLock>,
    name: String,
    token: Option<LockToken>,
}

impl LockGuard {
    /// Try once to take `name`.
    pub async fn acquire(
        locks: Arc<dyn NamedLock>,
        name: String,
        ttl: Duration,
    ) -> Result<Self, LedgerError> {
        match locks.try_acquire(&name, ttl).await {
            Ok(Some(token)) => {
                debug!(lock = %name, "acquired");
                Ok(Self {
                    locks,
                    name,
                    token: Some(token),
                })
            }
            Ok(None) => {
                debug!(lock = %name, "held elsewhere");
                Err(LedgerError::LockUnavailable)
            }
            Err(e) => {
                warn!(lock = %name, error = %e, "lock service failed");
                Err(LedgerError::LockUnavailable)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Release the lock. Errors are logged; an unreleased lock still expires.
    pub async fn release(mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.locks.release(&self.name, &token).await {
                warn!(lock = %self.name, error = %e, "failed to release lock");
            } else {
                debug!(lock = %self.name, "released");
            }
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let Some(token) = self.token.take() else {
            return;
        };
        let locks = Arc::clone(&self.locks);
        let name = std::mem::take(&mut self.name);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = locks.release(&name, &token).await {
                        warn!(lock = %name, error = %e, "failed to release dropped lock");
                    }
                });
            }
            Err(_) => {
                warn!(lock = %name, "no runtime to release dropped lock, leaving it to expire");
            }
        }
    }
}

/// Locks on both wallets of a transfer, taken in ascending wallet-id order.
pub struct PairGuard {
    first: LockGuard,
    second: LockGuard,
}

impl PairGuard {
    /// Take both wallet locks or neither.
    ///
    /// The order depends only on the ids, never on which wallet sends.
    pub async fn acquire(
        locks: Arc<dyn NamedLock>,
        a: WalletId,
        b: WalletId,
        ttl: Duration,
    ) -> Result<Self, LedgerError> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        let first = LockGuard::acquire(Arc::clone(&locks), lock_name(low), ttl).await?;
        match LockGuard::acquire(locks, lock_name(high), ttl).await {
            Ok(second) => Ok(Self { first, second }),
            Err(e) => {
                first.release().await;
                Err(e)
            }
        }
    }

    /// Lock names in acquisition order.
    pub fn names(&self) -> [&str; 2] {
        [self.first.name(), self.second.name()]
    }

    /// Release both locks, last acquired first.
    pub async fn release(self) {
        self.second.release().await;
        self.first.release().await;
    }
}
