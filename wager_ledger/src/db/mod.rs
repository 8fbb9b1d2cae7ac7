//! Database module providing PostgreSQL connection pooling and the storage layer.
//!
//! Ledger and engine code only sees the traits in [`repository`]; [`PgRepository`] backs
//! them with PostgreSQL and [`MemoryRepository`] keeps everything in process.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::future::Future;
use std::time::Duration;

pub mod config;
pub mod errors;
pub mod memory;
pub mod postgres;
pub mod repository;
pub mod timeouts;

pub use config::DatabaseConfig;
pub use errors::{StoreError, StoreResult};
pub use memory::MemoryRepository;
pub use postgres::PgRepository;
pub use repository::{
    AuditRepository, BetRepository, LedgerStore, LimitRepository, WalletRepository,
};

/// Run a storage call, retrying it once if the first attempt failed transiently.
///
/// Only for calls that are safe to repeat: reads, keyed inserts and movements that settle a
/// transaction status.
///
/// # Arguments
///
/// * `operation` - Name used in the retry warning
/// * `call` - Produces a fresh attempt each time it is invoked
///
/// # Errors
///
/// The first permanent error, or the second transient one
pub async fn retry_transient<T, F, Fut>(operation: &str, mut call: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    match call().await {
        Err(err) if err.is_transient() => {
            log::warn!("{operation} failed transiently, retrying once: {err}");
            call().await
        }
        result => result,
    }
}

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    ///
    /// # Arguments
    ///
    /// * `config` - Connection URL and pool sizing
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be reached within `connection_timeout_secs`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use wager_ledger::db::{Database, DatabaseConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), sqlx::Error> {
    ///     let config = DatabaseConfig::from_env();
    ///     let db = Database::new(&config).await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Migration`] if a migration fails or was changed after it ran
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Repository sharing this pool
    pub fn repository(&self) -> PgRepository {
        PgRepository::new(self.pool.clone())
    }

    /// Check if the database connection is healthy
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Timeout`] if `SELECT 1` takes longer than the default query
    /// timeout, or the underlying connection error
    pub async fn health_check(&self) -> StoreResult<()> {
        timeouts::with_default_timeout(sqlx::query("SELECT 1").execute(&self.pool)).await?;
        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}
