use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BalanceChange, BalanceError, Cents, WalletId};

pub type EntryId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Deposit,
    Withdrawal,
    Transfer,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Deposit => "DEPOSIT",
            EntryKind::Withdrawal => "WITHDRAWAL",
            EntryKind::Transfer => "TRANSFER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "DEPOSIT" => Some(EntryKind::Deposit),
            "WITHDRAWAL" => Some(EntryKind::Withdrawal),
            "TRANSFER" => Some(EntryKind::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable audit record of one balance-changing operation.
///
/// Balances are those of the source wallet (`wallet_id`). For transfers the
/// receiving wallet is `dest_wallet_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub wallet_id: WalletId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest_wallet_id: Option<WalletId>,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub amount: Cents,
    pub balance_before: Cents,
    pub balance_after: Cents,
    pub description: String,
    pub transaction_time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    /// Check the before/after arithmetic for this entry's kind.
    pub fn is_consistent(&self) -> bool {
        if self.amount <= 0 {
            return false;
        }
        let expected = match self.kind {
            EntryKind::Deposit => self.balance_before.checked_add(self.amount),
            EntryKind::Withdrawal | EntryKind::Transfer => {
                self.balance_before.checked_sub(self.amount)
            }
        };
        let dest_ok = match self.kind {
            EntryKind::Transfer => self
                .dest_wallet_id
                .is_some_and(|dest| dest != self.wallet_id),
            _ => self.dest_wallet_id.is_none(),
        };
        expected == Some(self.balance_after) && dest_ok
    }

    /// Signed effect of this entry on `wallet_id`'s balance.
    pub fn effect_on(&self, wallet_id: WalletId) -> Cents {
        match self.kind {
            EntryKind::Deposit if self.wallet_id == wallet_id => self.amount,
            EntryKind::Withdrawal if self.wallet_id == wallet_id => -self.amount,
            EntryKind::Transfer if self.wallet_id == wallet_id => -self.amount,
            EntryKind::Transfer if self.dest_wallet_id == Some(wallet_id) => self.amount,
            _ => 0,
        }
    }
}

/// A ledger entry that has not been assigned an id by the store yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLedgerEntry {
    pub wallet_id: WalletId,
    pub dest_wallet_id: Option<WalletId>,
    pub kind: EntryKind,
    pub amount: Cents,
    pub balance_before: Cents,
    pub balance_after: Cents,
    pub description: String,
    pub transaction_time: DateTime<Utc>,
}

impl NewLedgerEntry {
    pub fn into_entry(self, id: EntryId, created_at: DateTime<Utc>) -> LedgerEntry {
        LedgerEntry {
            id,
            wallet_id: self.wallet_id,
            dest_wallet_id: self.dest_wallet_id,
            kind: self.kind,
            amount: self.amount,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            description: self.description,
            transaction_time: self.transaction_time,
            created_at,
        }
    }
}

/// The unit a store commits atomically: every balance change plus the
/// ledger entry recording them. Either all of it persists or none of it does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posting {
    pub kind: EntryKind,
    /// Source wallet first; for transfers the receiver follows.
    pub changes: Vec<BalanceChange>,
    pub amount: Cents,
    pub description: String,
}

impl Posting {
    /// A deposit or withdrawal touching a single wallet.
    pub fn single(
        kind: EntryKind,
        wallet_id: WalletId,
        amount: Cents,
        description: impl Into<String>,
    ) -> Result<Self, BalanceError> {
        Ok(Self {
            kind,
            changes: vec![BalanceChange::for_source(kind, wallet_id, amount)?],
            amount,
            description: description.into(),
        })
    }

    /// A transfer: the sender is debited and the receiver credited.
    pub fn transfer(
        sender: WalletId,
        receiver: WalletId,
        amount: Cents,
        description: impl Into<String>,
    ) -> Result<Self, BalanceError> {
        Ok(Self {
            kind: EntryKind::Transfer,
            changes: vec![
                BalanceChange::debit(sender, amount)?,
                BalanceChange::credit(receiver, amount)?,
            ],
            amount,
            description: description.into(),
        })
    }

    /// The entry for this posting, given the source wallet's balance right
    /// after its change was applied.
    pub fn record(&self, source_after: Cents, at: DateTime<Utc>) -> Option<NewLedgerEntry> {
        let source = self.changes.first()?;
        Some(NewLedgerEntry {
            wallet_id: source.wallet_id,
            dest_wallet_id: self.changes.get(1).map(|c| c.wallet_id),
            kind: self.kind,
            amount: self.amount,
            balance_before: source_after - source.delta,
            balance_after: source_after,
            description: self.description.clone(),
            transaction_time: at,
        })
    }
}

/// One page of a wallet's history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    #[serde(rename = "transactions")]
    pub entries: Vec<LedgerEntry>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
