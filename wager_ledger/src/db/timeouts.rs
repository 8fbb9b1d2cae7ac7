//! Database query timeout helpers
//!
//! Every PostgreSQL round trip in the repository goes through [`with_timeout`] so a stuck
//! connection surfaces as a transient [`StoreError::Timeout`] instead of a hung bet lock.

use super::errors::{StoreError, StoreResult};
use std::time::Duration;
use tokio::time::timeout;

/// Default timeout for database queries (5 seconds)
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for multi-statement transactions (10 seconds)
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Execute a query with timeout
///
/// # Arguments
///
/// * `duration` - Upper bound for the whole query
/// * `future` - The query future
///
/// # Errors
///
/// [`StoreError::Timeout`] when `duration` elapses, otherwise the query's own error
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> StoreResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    match timeout(duration, future).await {
        Ok(Ok(result)) => Ok(result),
        Ok(Err(e)) => Err(StoreError::Database(e)),
        Err(_) => Err(StoreError::Timeout(duration)),
    }
}

/// Execute a query with the default timeout (5 seconds)
pub async fn with_default_timeout<F, T>(future: F) -> StoreResult<T>
where
    F: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    with_timeout(DEFAULT_QUERY_TIMEOUT, future).await
}

/// Run a whole storage transaction under [`DEFAULT_TRANSACTION_TIMEOUT`]
pub async fn with_transaction_timeout<F, T>(future: F) -> StoreResult<T>
where
    F: std::future::Future<Output = StoreResult<T>>,
{
    match timeout(DEFAULT_TRANSACTION_TIMEOUT, future).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(DEFAULT_TRANSACTION_TIMEOUT)),
    }
}
