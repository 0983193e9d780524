use thiserror::Error;

use crate::domain::{BalanceError, Cents, UserId};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount must be positive")]
    InvalidAmount,

    #[error("Insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: Cents, requested: Cents },

    #[error("Sender and receiver cannot be the same")]
    SameSenderReceiver,

    #[error("User not found: {0}")]
    UserNotFound(UserId),

    #[error("Wallet not found for user: {0}")]
    WalletNotFound(UserId),

    #[error("User not found: {0}")]
    UsernameNotFound(String),

    #[error("Wallet is locked by another transfer")]
    LockUnavailable,

    #[error("Store error: {0:#}")]
    Store(#[from] anyhow::Error),
}

impl LedgerError {
    /// Whether repeating the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LedgerError::LockUnavailable | LedgerError::Store(_))
    }

    /// Message that is safe to show a client. Infrastructure details stay in
    /// the logs.
    pub fn public_message(&self) -> String {
        match self {
            LedgerError::InvalidAmount => "Amount must be positive".to_string(),
            LedgerError::InsufficientFunds { .. } => "Insufficient funds".to_string(),
            LedgerError::SameSenderReceiver => {
                "Sender and receiver cannot be the same".to_string()
            }
            LedgerError::UserNotFound(_) | LedgerError::UsernameNotFound(_) => {
                "User not found".to_string()
            }
            LedgerError::WalletNotFound(_) => "Wallet not found".to_string(),
            LedgerError::LockUnavailable => "Service is busy, please try again".to_string(),
            LedgerError::Store(_) => "An unexpected error occurred, please try again".to_string(),
        }
    }
}

impl From<BalanceError> for LedgerError {
    fn from(err: BalanceError) -> Self {
        match err {
            BalanceError::InvalidAmount | BalanceError::Overflow => LedgerError::InvalidAmount,
            BalanceError::InsufficientFunds { balance, requested } => {
                LedgerError::InsufficientFunds { balance, requested }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_details_do_not_leak() {
        let err = LedgerError::from(anyhow::anyhow!("disk I/O error at /var/lib/coffer.db"));
        assert!(err.is_retryable());
        assert!(!err.public_message().contains("coffer.db"));
        assert!(err.to_string().contains("coffer.db"));
    }

    #[test]
    fn test_domain_errors_are_final() {
        assert!(!LedgerError::InvalidAmount.is_retryable());
        assert!(!LedgerError::UserNotFound(1).is_retryable());
        assert!(!LedgerError::UsernameNotFound("dave".into()).is_retryable());
        assert!(LedgerError::LockUnavailable.is_retryable());
    }

    #[test]
    fn test_unknown_user_message_is_the_same_for_ids_and_names() {
        let by_id = LedgerError::UserNotFound(42);
        let by_name = LedgerError::UsernameNotFound("dave".into());

        assert_eq!(by_id.public_message(), by_name.public_message());
        assert_eq!(by_name.to_string(), "User not found: dave");
    }

    #[test]
    fn test_balance_error_mapping() {
        let err: LedgerError = BalanceError::InsufficientFunds {
            balance: 100,
            requested: 150,
        }
        .into();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                balance: 100,
                requested: 150
            }
        ));
        assert!(matches!(
            LedgerError::from(BalanceError::Overflow),
            LedgerError::InvalidAmount
        ));
    }
}
