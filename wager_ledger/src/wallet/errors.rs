//! Wallet error types.

use super::models::{TransactionStatus, TransactionType};
use crate::db::StoreError;
use crate::error::ErrorKind;
use crate::money::Money;
use thiserror::Error;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Not enough available funds
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        user_id: i64,
        available: Money,
        required: Money,
    },

    /// Not enough locked funds to unlock or debit
    #[error("Insufficient locked funds: locked {locked}, required {required}")]
    InsufficientLocked {
        user_id: i64,
        locked: Money,
        required: Money,
    },

    /// Invalid amount (must be positive)
    #[error("Invalid amount: {0}")]
    InvalidAmount(Money),

    /// Single movement above the configured ceiling
    #[error("Amount {amount} exceeds maximum transaction of {max}")]
    AmountExceedsLimit { amount: Money, max: Money },

    /// Daily deposit or withdrawal cap reached
    #[error("Daily {kind} limit exceeded: used {used} of {limit}")]
    DailyLimitExceeded {
        kind: &'static str,
        used: Money,
        limit: Money,
    },

    /// Wallet not found
    #[error("Wallet not found for user {0}")]
    WalletNotFound(i64),

    /// Operation does not accept this transaction type
    #[error("Invalid transaction type for this operation: {0}")]
    InvalidTransactionType(TransactionType),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(i64),

    /// Transaction is not in the state the operation needs
    #[error("Transaction {id} is {actual}, expected {expected}")]
    InvalidTransactionState {
        id: i64,
        expected: TransactionStatus,
        actual: TransactionStatus,
    },

    /// A user asked for someone else's wallet
    #[error("Access denied: user {requester} cannot access wallet of user {owner}")]
    AccessDenied { requester: i64, owner: i64 },

    /// Transaction failed
    #[error("Transaction failed: {0}")]
    TransactionFailed(String),
}

impl WalletError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WalletError::Storage(_) | WalletError::TransactionFailed(_) => ErrorKind::Internal,
            WalletError::InsufficientFunds { .. } | WalletError::InsufficientLocked { .. } => {
                ErrorKind::InsufficientFunds
            }
            WalletError::InvalidAmount(_)
            | WalletError::AmountExceedsLimit { .. }
            | WalletError::DailyLimitExceeded { .. }
            | WalletError::InvalidTransactionType(_) => ErrorKind::Validation,
            WalletError::WalletNotFound(_) | WalletError::TransactionNotFound(_) => {
                ErrorKind::NotFound
            }
            WalletError::InvalidTransactionState { .. } => ErrorKind::BusinessLogic,
            WalletError::AccessDenied { .. } => ErrorKind::Security,
        }
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Storage errors are replaced by a generic message and user ids are redacted.
    pub fn client_message(&self) -> String {
        match self {
            WalletError::Storage(_) | WalletError::TransactionFailed(_) => {
                "Internal server error".to_string()
            }
            WalletError::WalletNotFound(_) => "Wallet not found".to_string(),
            WalletError::AccessDenied { .. } => "Access denied".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;
