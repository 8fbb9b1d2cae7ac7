//! Error taxonomy shared by the ledger and the lifecycle engine.

use serde::Serialize;

/// Coarse classification of a failure, used by callers to pick a response.
///
/// Everything except [`ErrorKind::Internal`] is safe to show to the user verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input, e.g. an amount out of bounds
    Validation,
    /// Not enough available or locked funds
    InsufficientFunds,
    /// Cross-user access or another forbidden actor
    Security,
    /// State conflict, e.g. accepting a bet that is not pending
    BusinessLogic,
    NotFound,
    /// Storage failure; details must not reach the client
    Internal,
}

impl ErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Internal)
    }
}
