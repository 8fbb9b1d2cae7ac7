//! Repository trait definitions.
//!
//! The managers only talk to storage through these traits, so the same ledger and
//! engine code runs on PostgreSQL ([`super::PgRepository`]) and on the in-process
//! [`super::MemoryRepository`].

use super::errors::StoreResult;
use crate::audit::{AuditEntry, NewAuditEntry};
use crate::betting::{Bet, BetId, BetLimit, BetResolution, BetStatistics, BetStatus};
use crate::money::Money;
use crate::wallet::{
    BalanceMovement, NewTransaction, StatusChange, Transaction, TransactionStatus, TransactionType,
    Wallet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Trait for wallet and transaction storage
#[async_trait]
pub trait WalletRepository: Send + Sync {
    /// Find a wallet by owner
    async fn find_wallet(&self, user_id: i64) -> StoreResult<Option<Wallet>>;

    /// Get the user's wallet, creating an empty one if none exists
    async fn get_or_create_wallet(&self, user_id: i64) -> StoreResult<Wallet>;

    /// Insert a write-ahead transaction in `pending` status.
    ///
    /// Idempotent on `new.idempotency_key`: a second insert returns the stored row.
    async fn insert_transaction(&self, new: &NewTransaction) -> StoreResult<Transaction>;

    /// Insert a `pending` withdrawal and move its amount from available to locked in one
    /// storage transaction.
    ///
    /// # Returns
    ///
    /// The stored record and the wallet after the hold. When the available balance is
    /// short the record is stored `failed` and no wallet is returned. Idempotent on
    /// `new.idempotency_key`, so a retry reports the first outcome without holding twice.
    async fn insert_held_withdrawal(
        &self,
        new: &NewTransaction,
    ) -> StoreResult<(Transaction, Option<Wallet>)>;

    /// Apply a conditional balance update.
    ///
    /// Returns `None` without changing anything when a resulting balance would be
    /// negative, the wallet does not exist, or the transaction is not in the status
    /// the movement settles from.
    async fn apply_movement(&self, movement: &BalanceMovement) -> StoreResult<Option<Wallet>>;

    /// Change a transaction's status without touching balances; returns false if it was
    /// not in `change.from`
    async fn transition_transaction(
        &self,
        transaction_id: i64,
        change: StatusChange,
        at: DateTime<Utc>,
    ) -> StoreResult<bool>;

    async fn find_transaction(&self, transaction_id: i64) -> StoreResult<Option<Transaction>>;

    /// A user's transactions, newest first
    async fn list_transactions(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>>;

    /// Transactions tied to a bet, oldest first
    async fn transactions_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<Transaction>>;

    /// All transactions created at or after `since`, oldest first (reconciliation feed)
    async fn transactions_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>>;

    /// Sum of a user's transactions of one type in the given statuses since `since`
    async fn sum_transactions_since(
        &self,
        user_id: i64,
        transaction_type: TransactionType,
        statuses: &[TransactionStatus],
        since: DateTime<Utc>,
    ) -> StoreResult<Money>;
}

/// Trait for bet aggregate storage
#[async_trait]
pub trait BetRepository: Send + Sync {
    /// Insert a new bet with its participants; returns it with ids assigned
    async fn insert_bet(&self, bet: &Bet) -> StoreResult<Bet>;

    /// Load a bet with its participants
    async fn find_bet(&self, bet_id: BetId) -> StoreResult<Option<Bet>>;

    /// Persist a bet and upsert its participants, only if the stored version is
    /// `expected_version`. Returns false on a version mismatch.
    async fn update_bet(&self, bet: &Bet, expected_version: i64) -> StoreResult<bool>;

    async fn insert_resolution(&self, resolution: &BetResolution) -> StoreResult<BetResolution>;

    async fn find_resolution(&self, bet_id: BetId) -> StoreResult<Option<BetResolution>>;

    /// Bets a user created or takes part in, newest first
    async fn list_user_bets(
        &self,
        user_id: i64,
        status: Option<BetStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>>;

    /// Bets in any of `statuses`, newest first
    async fn list_bets_by_status(
        &self,
        statuses: &[BetStatus],
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>>;

    /// Ids of pending bets whose expiry is before `now`, oldest expiry first
    async fn list_expired_pending(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<BetId>>;

    async fn user_statistics(&self, user_id: i64) -> StoreResult<BetStatistics>;
}

/// Trait for per-user risk limit storage
#[async_trait]
pub trait LimitRepository: Send + Sync {
    async fn find_limit(&self, user_id: i64) -> StoreResult<Option<BetLimit>>;

    /// Insert or replace the user's limit row
    async fn save_limit(&self, limit: &BetLimit) -> StoreResult<()>;
}

/// Trait for the append-only audit log
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append a row; idempotent on `entry.idempotency_key`
    async fn append_audit(&self, entry: &NewAuditEntry) -> StoreResult<AuditEntry>;

    /// Audit rows of one bet, oldest first
    async fn audit_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<AuditEntry>>;

    /// Audit rows created at or after `since`, oldest first
    async fn audit_since(&self, since: DateTime<Utc>, limit: i64) -> StoreResult<Vec<AuditEntry>>;
}

/// Everything the ledger and engine need from storage
pub trait LedgerStore: WalletRepository + BetRepository + LimitRepository + AuditRepository {}

impl<T> LedgerStore for T where T: WalletRepository + BetRepository + LimitRepository + AuditRepository
{}
