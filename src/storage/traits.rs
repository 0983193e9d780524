//! Store contracts consumed by the ledger engine.
//!
//! The engine only sees these traits, so tests and alternative backends can
//! stand in for SQLite.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{BalanceError, LedgerEntry, Posting, User, UserId, Wallet, WalletId};

/// Result of trying to commit a [`Posting`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed(LedgerEntry),
    /// A change did not fit the wallet's balance at commit time. Nothing
    /// was written.
    Rejected {
        wallet_id: WalletId,
        reason: BalanceError,
    },
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get_user(&self, id: UserId) -> Result<Option<User>>;
}

#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn get_wallet_by_user(&self, user_id: UserId) -> Result<Option<Wallet>>;

    async fn get_wallet(&self, id: WalletId) -> Result<Option<Wallet>>;

    /// Apply every balance change and append the entry as one atomic unit.
    ///
    /// Each change is checked against the wallet's balance at the moment it
    /// is written, serialized with every other commit. If any change does
    /// not fit, the whole posting is discarded and
    /// [`CommitOutcome::Rejected`] names the wallet and the reason. A wallet
    /// that does not exist is an error.
    async fn commit(&self, posting: &Posting) -> Result<CommitOutcome>;
}

#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Entries where the wallet is the source or the destination, newest
    /// first, together with the total count for pagination.
    async fn list_entries_by_wallet(
        &self,
        wallet_id: WalletId,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<LedgerEntry>, i64)>;
}

/// Everything the engine needs from persistence.
pub trait LedgerStore: UserStore + WalletStore + EntryStore {}

impl<T: UserStore + WalletStore + EntryStore> LedgerStore for T {}
