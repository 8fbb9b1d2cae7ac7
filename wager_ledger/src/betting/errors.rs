//! Bet lifecycle error types.

use super::models::{BetId, BetStatus};
use crate::db::StoreError;
use crate::error::ErrorKind;
use crate::wallet::WalletError;
use thiserror::Error;

/// Bet lifecycle errors
#[derive(Debug, Error)]
pub enum BetError {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    /// Ledger failure that is not a plain validation or funds problem
    #[error("Wallet error: {0}")]
    Wallet(WalletError),

    /// Bad request data or a risk limit breach
    #[error("{0}")]
    Validation(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    /// Actor is not allowed to perform the action
    #[error("{0}")]
    Security(String),

    #[error("Bet not found: {0}")]
    BetNotFound(BetId),

    /// Action is not valid from the bet's current status
    #[error("Bet {bet_id} cannot move from {from} to {to}")]
    InvalidTransition {
        bet_id: BetId,
        from: BetStatus,
        to: BetStatus,
    },

    /// Other state conflict
    #[error("{0}")]
    BusinessLogic(String),

    #[error("Bet has already been resolved")]
    AlreadyResolved(BetId),

    #[error("Bet has expired")]
    Expired(BetId),

    /// The bet changed underneath us
    #[error("Bet {0} was modified concurrently")]
    Conflict(BetId),
}

impl BetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BetError::Storage(_) => ErrorKind::Internal,
            BetError::Wallet(err) => err.kind(),
            BetError::Validation(_) => ErrorKind::Validation,
            BetError::InsufficientFunds(_) => ErrorKind::InsufficientFunds,
            BetError::Security(_) => ErrorKind::Security,
            BetError::BetNotFound(_) => ErrorKind::NotFound,
            BetError::InvalidTransition { .. }
            | BetError::BusinessLogic(_)
            | BetError::AlreadyResolved(_)
            | BetError::Expired(_)
            | BetError::Conflict(_) => ErrorKind::BusinessLogic,
        }
    }

    /// Get a client-safe error message
    pub fn client_message(&self) -> String {
        match self {
            BetError::Storage(_) => "Internal server error".to_string(),
            BetError::Wallet(err) => err.client_message(),
            BetError::BetNotFound(_) => "Bet not found".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<WalletError> for BetError {
    fn from(err: WalletError) -> Self {
        match err {
            WalletError::Storage(store) => BetError::Storage(store),
            WalletError::InsufficientFunds { .. } | WalletError::InsufficientLocked { .. } => {
                BetError::InsufficientFunds(err.to_string())
            }
            WalletError::InvalidAmount(_)
            | WalletError::AmountExceedsLimit { .. }
            | WalletError::DailyLimitExceeded { .. }
            | WalletError::InvalidTransactionType(_) => BetError::Validation(err.to_string()),
            WalletError::AccessDenied { .. } => BetError::Security(err.to_string()),
            other => BetError::Wallet(other),
        }
    }
}

/// Result type for bet operations
pub type BetResult<T> = Result<T, BetError>;
