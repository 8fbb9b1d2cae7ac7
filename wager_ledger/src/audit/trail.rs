//! Append-only audit log writer and reader.

use super::models::{AuditAction, AuditEntry, NewAuditEntry};
use crate::betting::{Bet, BetId};
use crate::clock::Clock;
use crate::db::{LedgerStore, StoreResult, retry_transient};
use crate::wallet::LedgerReceipt;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use std::sync::Arc;
use uuid::Uuid;

/// Status snapshot stored in `old_value` / `new_value` of transition rows
pub fn bet_snapshot(bet: &Bet) -> Value {
    json!({
        "status": bet.status,
        "outcome": bet.outcome,
        "version": bet.version,
    })
}

/// Snapshot of one ledger movement tied to a bet
pub fn movement_snapshot(receipt: &LedgerReceipt) -> Value {
    json!({
        "transaction_id": receipt.transaction.id,
        "user_id": receipt.transaction.user_id,
        "transaction_type": receipt.transaction.transaction_type,
        "amount": receipt.transaction.amount,
        "available_balance": receipt.wallet.available_balance,
        "locked_balance": receipt.wallet.locked_balance,
    })
}

/// Writes and reads [`AuditEntry`] rows. Rows are never updated or deleted.
#[derive(Clone)]
pub struct AuditLog {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Append one row stamped with the current time.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the row could not be written after one retry
    pub async fn record(
        &self,
        bet_id: BetId,
        user_id: Option<i64>,
        action: AuditAction,
        old_value: Option<Value>,
        new_value: Option<Value>,
        reason: Option<String>,
    ) -> StoreResult<AuditEntry> {
        let entry = NewAuditEntry {
            idempotency_key: Uuid::new_v4(),
            bet_id,
            user_id,
            action,
            old_value,
            new_value,
            reason,
            created_at: self.clock.now(),
        };
        // The key makes a retry after a commit that reported failure a no-op
        retry_transient("append_audit", || self.store.append_audit(&entry)).await
    }

    /// Record a bet status change
    pub async fn transition(
        &self,
        before: &Bet,
        after: &Bet,
        user_id: Option<i64>,
        action: AuditAction,
        reason: Option<String>,
    ) {
        self.record_or_log(
            after.id,
            user_id,
            action,
            Some(bet_snapshot(before)),
            Some(bet_snapshot(after)),
            reason,
        )
        .await;
    }

    /// Record a ledger movement made on behalf of a bet
    pub async fn movement(&self, bet_id: BetId, action: AuditAction, receipt: &LedgerReceipt) {
        self.record_or_log(
            bet_id,
            Some(receipt.transaction.user_id),
            action,
            None,
            Some(movement_snapshot(receipt)),
            receipt.transaction.description.clone(),
        )
        .await;
    }

    /// Write a row once state has already been committed; a storage failure here is logged
    /// rather than returned so it cannot trigger compensation of committed work.
    pub async fn record_or_log(
        &self,
        bet_id: BetId,
        user_id: Option<i64>,
        action: AuditAction,
        old_value: Option<Value>,
        new_value: Option<Value>,
        reason: Option<String>,
    ) {
        if let Err(err) = self
            .record(bet_id, user_id, action, old_value, new_value, reason)
            .await
        {
            log::error!("Failed to write {action} audit row for bet {bet_id}: {err}");
        }
    }

    /// Rows of one bet, oldest first
    pub async fn for_bet(&self, bet_id: BetId) -> StoreResult<Vec<AuditEntry>> {
        self.store.audit_for_bet(bet_id).await
    }

    /// Rows created at or after `since`, oldest first
    pub async fn since(&self, since: DateTime<Utc>, limit: i64) -> StoreResult<Vec<AuditEntry>> {
        self.store.audit_since(since, limit).await
    }
}
