//! Audit log data models.

use crate::betting::BetId;
use crate::macros::text_enum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum! {
    /// What an audit row records
    pub enum AuditAction {
        BetCreated => "bet_created",
        BetAccepted => "bet_accepted",
        BetActivated => "bet_activated",
        BetCompleted => "bet_completed",
        BetDisputed => "bet_disputed",
        BetResolved => "bet_resolved",
        BetRefunded => "bet_refunded",
        BetCancelled => "bet_cancelled",
        BetExpired => "bet_expired",
        FundsLocked => "funds_locked",
        FundsUnlocked => "funds_unlocked",
        FundsCredited => "funds_credited",
        FundsDebited => "funds_debited",
        CommissionCollected => "commission_collected",
        OperationFailed => "operation_failed",
        CompensationFailed => "compensation_failed",
    }
}

/// One append-only audit row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub bet_id: BetId,
    /// `None` for system actions such as expiry
    pub user_id: Option<i64>,
    pub action: AuditAction,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Audit row before it is stored
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    /// Client-generated; appending the same key twice stores one row
    pub idempotency_key: Uuid,
    pub bet_id: BetId,
    pub user_id: Option<i64>,
    pub action: AuditAction,
    pub old_value: Option<serde_json::Value>,
    pub new_value: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
