use std::collections::HashMap;

use serde::Serialize;

use super::{Cents, LedgerEntry, Wallet, WalletId};

/// Compute net balances for every wallet mentioned in the entries.
/// Deposits and incoming transfers add, withdrawals and outgoing transfers subtract.
pub fn compute_all_balances(entries: &[LedgerEntry]) -> HashMap<WalletId, Cents> {
    let mut balances: HashMap<WalletId, Cents> = HashMap::new();

    for entry in entries {
        *balances.entry(entry.wallet_id).or_insert(0) += entry.effect_on(entry.wallet_id);
        if let Some(dest) = entry.dest_wallet_id {
            *balances.entry(dest).or_insert(0) += entry.effect_on(dest);
        }
    }

    balances
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum IntegrityIssue {
    /// balance_after does not follow from balance_before and amount
    InconsistentEntry { entry_id: i64 },
    /// stored balance differs from the net of the wallet's entries
    BalanceMismatch {
        wallet_id: WalletId,
        stored: Cents,
        computed: Cents,
    },
    NegativeBalance { wallet_id: WalletId, balance: Cents },
    /// entry references a wallet that does not exist
    UnknownWallet { entry_id: i64, wallet_id: WalletId },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::InconsistentEntry { entry_id } => {
                write!(f, "entry {} has inconsistent before/after balances", entry_id)
            }
            IntegrityIssue::BalanceMismatch {
                wallet_id,
                stored,
                computed,
            } => write!(
                f,
                "wallet {} balance is {} cents but its entries sum to {} cents",
                wallet_id, stored, computed
            ),
            IntegrityIssue::NegativeBalance { wallet_id, balance } => {
                write!(f, "wallet {} has negative balance {} cents", wallet_id, balance)
            }
            IntegrityIssue::UnknownWallet {
                entry_id,
                wallet_id,
            } => write!(f, "entry {} references unknown wallet {}", entry_id, wallet_id),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub wallet_count: usize,
    pub entry_count: usize,
    /// Sum of all stored wallet balances
    pub total_balance: Cents,
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }
}

/// Cross-check stored wallet balances against the audit trail.
pub fn build_integrity_report(wallets: &[Wallet], entries: &[LedgerEntry]) -> IntegrityReport {
    let mut issues = Vec::new();
    let known: HashMap<WalletId, &Wallet> = wallets.iter().map(|w| (w.id, w)).collect();

    for entry in entries {
        if !entry.is_consistent() {
            issues.push(IntegrityIssue::InconsistentEntry { entry_id: entry.id });
        }
        for wallet_id in std::iter::once(entry.wallet_id).chain(entry.dest_wallet_id) {
            if !known.contains_key(&wallet_id) {
                issues.push(IntegrityIssue::UnknownWallet {
                    entry_id: entry.id,
                    wallet_id,
                });
            }
        }
    }

    let computed = compute_all_balances(entries);
    for wallet in wallets {
        if wallet.balance < 0 {
            issues.push(IntegrityIssue::NegativeBalance {
                wallet_id: wallet.id,
                balance: wallet.balance,
            });
        }
        let net = computed.get(&wallet.id).copied().unwrap_or(0);
        if net != wallet.balance {
            issues.push(IntegrityIssue::BalanceMismatch {
                wallet_id: wallet.id,
                stored: wallet.balance,
                computed: net,
            });
        }
    }

    IntegrityReport {
        wallet_count: wallets.len(),
        entry_count: entries.len(),
        total_balance: wallets.iter().map(|w| w.balance).sum(),
        issues,
    }
}
