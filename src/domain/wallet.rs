use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Cents, EntryKind, UserId};

pub type WalletId = i64;

/// Default currency for newly created wallets.
pub const DEFAULT_CURRENCY: &str = "USD";

/// A user's balance record. Exactly one wallet exists per user.
///
/// `version` is bumped by the store on every committed balance change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: WalletId,
    pub user_id: UserId,
    pub balance: Cents,
    pub currency: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A signed movement on one wallet.
///
/// It carries no balance: the store applies it to whatever balance the
/// wallet holds when the write happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceChange {
    pub wallet_id: WalletId,
    pub delta: Cents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceError {
    InvalidAmount,
    InsufficientFunds { balance: Cents, requested: Cents },
    Overflow,
}

impl std::fmt::Display for BalanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BalanceError::InvalidAmount => write!(f, "amount must be positive"),
            BalanceError::InsufficientFunds { balance, requested } => write!(
                f,
                "insufficient funds: balance {} cents, requested {} cents",
                balance, requested
            ),
            BalanceError::Overflow => write!(f, "balance would overflow"),
        }
    }
}

impl std::error::Error for BalanceError {}

impl BalanceChange {
    /// Add `amount` to the wallet.
    pub fn credit(wallet_id: WalletId, amount: Cents) -> Result<Self, BalanceError> {
        if amount <= 0 {
            return Err(BalanceError::InvalidAmount);
        }
        Ok(Self {
            wallet_id,
            delta: amount,
        })
    }

    /// Remove `amount` from the wallet.
    pub fn debit(wallet_id: WalletId, amount: Cents) -> Result<Self, BalanceError> {
        if amount <= 0 {
            return Err(BalanceError::InvalidAmount);
        }
        Ok(Self {
            wallet_id,
            delta: -amount,
        })
    }

    /// The change a posting of `kind` makes to its source wallet.
    pub fn for_source(
        kind: EntryKind,
        wallet_id: WalletId,
        amount: Cents,
    ) -> Result<Self, BalanceError> {
        match kind {
            EntryKind::Deposit => Self::credit(wallet_id, amount),
            EntryKind::Withdrawal | EntryKind::Transfer => Self::debit(wallet_id, amount),
        }
    }

    /// Balance after applying this change to `balance`.
    /// The result never goes below zero.
    pub fn apply_to(&self, balance: Cents) -> Result<Cents, BalanceError> {
        let after = balance
            .checked_add(self.delta)
            .ok_or(BalanceError::Overflow)?;
        if after < 0 {
            return Err(BalanceError::InsufficientFunds {
                balance,
                requested: -self.delta,
            });
        }
        Ok(after)
    }

    /// Inclusive range of current balances [`BalanceChange::apply_to`]
    /// accepts. Lets a store check and write in one conditional statement.
    pub fn allowed_range(&self) -> (Cents, Cents) {
        if self.delta >= 0 {
            (0, Cents::MAX - self.delta)
        } else {
            (-self.delta, Cents::MAX)
        }
    }
}
