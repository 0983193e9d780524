use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::cache::{BalanceCache, DEFAULT_BALANCE_TTL, balance_key};
use crate::domain::{
    Cents, EntryKind, HistoryPage, LedgerEntry, Posting, UserId, Wallet,
};
use crate::lock::{DEFAULT_LOCK_TTL, NamedLock, PairGuard};
use crate::storage::{CommitOutcome, LedgerStore};

use super::LedgerError;

/// Tuning knobs for [`LedgerEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Lifetime of a cached balance.
    pub cache_ttl: Duration,
    /// Expiry of a wallet lock held by a transfer.
    pub lock_ttl: Duration,
    /// History page size used when the caller asks for none.
    pub default_history_limit: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl: DEFAULT_BALANCE_TTL,
            lock_ttl: DEFAULT_LOCK_TTL,
            default_history_limit: 10,
        }
    }
}

/// The money-movement engine.
///
/// Every mutation resolves the wallet from the store, never from the cache,
/// and hands the store a [`Posting`] to commit together with its ledger
/// entry. The store checks balances inside its own serialized transaction,
/// which is what keeps them correct under concurrency; the wallet locks
/// only keep transfers over the same pair from fighting.
pub struct LedgerEngine {
    store: Arc<dyn LedgerStore>,
    cache: Arc<dyn BalanceCache>,
    locks: Arc<dyn NamedLock>,
    config: EngineConfig,
}

impl LedgerEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        cache: Arc<dyn BalanceCache>,
        locks: Arc<dyn NamedLock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            cache,
            locks,
            config,
        }
    }

    // ========================
    // Mutations
    // ========================

    /// Add `amount` to the user's wallet.
    pub async fn deposit(
        &self,
        user_id: UserId,
        amount: Cents,
        note: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.post_single(user_id, EntryKind::Deposit, amount, note)
            .await
    }

    /// Remove `amount` from the user's wallet. Fails without side effects if
    /// the balance does not cover it.
    pub async fn withdraw(
        &self,
        user_id: UserId,
        amount: Cents,
        note: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        self.post_single(user_id, EntryKind::Withdrawal, amount, note)
            .await
    }

    /// Move `amount` from the sender's wallet to the receiver's.
    ///
    /// Both wallet locks are held for the duration of the commit. Both legs
    /// and the entry are committed as one unit. If the returned future is
    /// dropped mid-commit the locks are still released.
    pub async fn transfer(
        &self,
        sender_id: UserId,
        receiver_id: UserId,
        amount: Cents,
        note: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        if sender_id == receiver_id {
            return Err(LedgerError::SameSenderReceiver);
        }

        let sender = self.resolve_wallet(sender_id).await?;
        let receiver = self.resolve_wallet(receiver_id).await?;

        let guard = PairGuard::acquire(
            Arc::clone(&self.locks),
            sender.id,
            receiver.id,
            self.config.lock_ttl,
        )
        .await?;

        let result = match Posting::transfer(sender.id, receiver.id, amount, note) {
            Ok(posting) => self.commit(&posting).await,
            Err(e) => Err(e.into()),
        };

        if result.is_ok() {
            self.invalidate(&[sender_id, receiver_id]).await;
        }
        guard.release().await;

        let entry = result?;
        info!(
            entry_id = entry.id,
            sender_id,
            receiver_id,
            amount,
            "transfer committed"
        );
        Ok(entry)
    }

    async fn post_single(
        &self,
        user_id: UserId,
        kind: EntryKind,
        amount: Cents,
        note: &str,
    ) -> Result<LedgerEntry, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }

        let wallet = self.resolve_wallet(user_id).await?;
        let posting = Posting::single(kind, wallet.id, amount, note)?;
        let entry = self.commit(&posting).await?;

        self.invalidate(&[user_id]).await;
        info!(
            entry_id = entry.id,
            user_id,
            wallet_id = wallet.id,
            kind = %kind,
            amount,
            balance_after = entry.balance_after,
            "posting committed"
        );
        Ok(entry)
    }

    async fn commit(&self, posting: &Posting) -> Result<LedgerEntry, LedgerError> {
        match self
            .store
            .commit(posting)
            .await
            .with_context(|| format!("Failed to commit {}", posting.kind))?
        {
            CommitOutcome::Committed(entry) => Ok(entry),
            CommitOutcome::Rejected { wallet_id, reason } => {
                debug!(wallet_id, kind = %posting.kind, %reason, "posting rejected");
                Err(reason.into())
            }
        }
    }

    // ========================
    // Reads
    // ========================

    /// Current wallet of a user. May be up to `cache_ttl` stale.
    pub async fn get_balance(&self, user_id: UserId) -> Result<Wallet, LedgerError> {
        let key = balance_key(user_id);

        match self.cache.get(&key).await {
            Ok(Some(bytes)) => match serde_json::from_slice::<Wallet>(&bytes) {
                Ok(wallet) if wallet.user_id == user_id => {
                    debug!(user_id, "balance cache hit");
                    return Ok(wallet);
                }
                Ok(wallet) => {
                    warn!(user_id, cached_user_id = wallet.user_id, "cached wallet belongs to another user");
                }
                Err(e) => {
                    warn!(user_id, error = %e, "discarding corrupt cached balance");
                }
            },
            Ok(None) => debug!(user_id, "balance cache miss"),
            Err(e) => warn!(user_id, error = %e, "balance cache read failed"),
        }

        let wallet = self.resolve_wallet(user_id).await?;

        match serde_json::to_vec(&wallet) {
            Ok(bytes) => {
                if let Err(e) = self.cache.set(&key, bytes, self.config.cache_ttl).await {
                    warn!(user_id, error = %e, "balance cache write failed");
                }
            }
            Err(e) => warn!(user_id, error = %e, "failed to serialize wallet for cache"),
        }

        Ok(wallet)
    }

    /// A page of the user's ledger entries, newest first.
    ///
    /// A non-positive `limit` falls back to the configured default and a
    /// negative `offset` to zero. The cache is not touched.
    pub async fn get_history(
        &self,
        user_id: UserId,
        limit: i64,
        offset: i64,
    ) -> Result<HistoryPage, LedgerError> {
        let limit = if limit <= 0 {
            self.config.default_history_limit
        } else {
            limit
        };
        let offset = offset.max(0);

        let wallet = self.resolve_wallet(user_id).await?;
        let (entries, total) = self
            .store
            .list_entries_by_wallet(wallet.id, limit, offset)
            .await
            .context("Failed to list wallet history")?;

        Ok(HistoryPage {
            entries,
            total,
            limit,
            offset,
        })
    }

    // ========================
    // Helpers
    // ========================

    async fn resolve_wallet(&self, user_id: UserId) -> Result<Wallet, LedgerError> {
        self.store
            .get_user(user_id)
            .await
            .context("Failed to look up user")?
            .ok_or(LedgerError::UserNotFound(user_id))?;

        self.store
            .get_wallet_by_user(user_id)
            .await
            .context("Failed to look up wallet")?
            .ok_or(LedgerError::WalletNotFound(user_id))
    }

    /// Drop cached balances. Failures only leave an entry to expire.
    async fn invalidate(&self, user_ids: &[UserId]) {
        let keys: Vec<String> = user_ids.iter().copied().map(balance_key).collect();
        if let Err(e) = self.cache.delete(&keys).await {
            warn!(?user_ids, error = %e, "balance cache invalidation failed");
        }
    }
}
