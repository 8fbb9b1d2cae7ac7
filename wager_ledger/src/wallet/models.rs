//! Wallet data models.

use crate::macros::text_enum;
use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Neg;
use uuid::Uuid;

/// Correlation data attached to a ledger movement (bet id, role, payment reference...).
pub type LedgerMetadata = BTreeMap<String, String>;

/// Wallet model
///
/// `available_balance` and `locked_balance` are never negative and only change together
/// with a [`Transaction`] record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub available_balance: Money,
    pub locked_balance: Money,
    pub total_deposited: Money,
    pub total_withdrawn: Money,
    pub total_wagered: Money,
    pub total_won: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn balance(&self) -> Balance {
        Balance {
            available: self.available_balance,
            locked: self.locked_balance,
        }
    }
}

/// Consistent `(available, locked)` snapshot of one wallet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub available: Money,
    pub locked: Money,
}

impl Balance {
    pub fn total(&self) -> Money {
        self.available + self.locked
    }
}

text_enum! {
    /// Transaction type; the direction of a movement is implied by the type
    pub enum TransactionType {
        Deposit => "deposit",
        Withdrawal => "withdrawal",
        BetPlaced => "bet_placed",
        BetWon => "bet_won",
        BetLost => "bet_lost",
        Refund => "refund",
        Fee => "fee",
    }
}

text_enum! {
    /// Transaction status
    pub enum TransactionStatus {
        Pending => "pending",
        Completed => "completed",
        Failed => "failed",
        Cancelled => "cancelled",
    }
}

/// Immutable record of one ledger movement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub user_id: i64,
    pub wallet_id: i64,
    pub transaction_type: TransactionType,
    /// Always positive
    pub amount: Money,
    pub status: TransactionStatus,
    pub bet_id: Option<i64>,
    pub description: Option<String>,
    pub metadata: LedgerMetadata,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Write-ahead record, inserted as `pending` before the balance is touched
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// Client-generated; inserting the same key twice yields the first row
    pub idempotency_key: Uuid,
    pub user_id: i64,
    pub wallet_id: i64,
    pub transaction_type: TransactionType,
    pub amount: Money,
    pub bet_id: Option<i64>,
    pub description: Option<String>,
    pub metadata: LedgerMetadata,
    pub created_at: DateTime<Utc>,
}

/// Increments to a wallet's lifetime totals
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LifetimeCounters {
    pub deposited: Money,
    pub withdrawn: Money,
    pub wagered: Money,
    pub won: Money,
}

impl Neg for LifetimeCounters {
    type Output = LifetimeCounters;

    fn neg(self) -> LifetimeCounters {
        LifetimeCounters {
            deposited: -self.deposited,
            withdrawn: -self.withdrawn,
            wagered: -self.wagered,
            won: -self.won,
        }
    }
}

/// Required current status and new status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub from: TransactionStatus,
    pub to: TransactionStatus,
}

impl StatusChange {
    pub const fn new(from: TransactionStatus, to: TransactionStatus) -> Self {
        Self { from, to }
    }
}

/// One conditional balance update.
///
/// The store applies it only if both resulting balances stay non-negative and, when `settle`
/// is set, the transaction is still in `settle.from`. The lifetime counters and the status
/// change are written in the same storage transaction as the balances.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMovement {
    pub user_id: i64,
    pub transaction_id: i64,
    pub available_delta: Money,
    pub locked_delta: Money,
    pub counters: LifetimeCounters,
    pub settle: Option<StatusChange>,
    pub at: DateTime<Utc>,
}

impl BalanceMovement {
    /// The movement that undoes this one and cancels its completed transaction.
    pub fn reversal(&self, at: DateTime<Utc>) -> BalanceMovement {
        BalanceMovement {
            user_id: self.user_id,
            transaction_id: self.transaction_id,
            available_delta: -self.available_delta,
            locked_delta: -self.locked_delta,
            counters: -self.counters,
            settle: Some(StatusChange::new(
                TransactionStatus::Completed,
                TransactionStatus::Cancelled,
            )),
            at,
        }
    }
}

/// Outcome of a completed ledger movement
#[derive(Debug, Clone)]
pub struct LedgerReceipt {
    pub transaction: Transaction,
    /// Wallet state right after the movement
    pub wallet: Wallet,
    pub movement: BalanceMovement,
}

/// Why money is moving; carried into the transaction record
#[derive(Debug, Clone, Default)]
pub struct LedgerContext {
    pub reason: String,
    pub bet_id: Option<i64>,
    pub metadata: LedgerMetadata,
}

impl LedgerContext {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ..Default::default()
        }
    }

    pub fn for_bet(bet_id: i64, reason: impl Into<String>) -> Self {
        let mut ctx = Self::new(reason);
        ctx.bet_id = Some(bet_id);
        ctx.metadata.insert("bet_id".to_string(), bet_id.to_string());
        ctx
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_type_text_roundtrip() {
        for ty in TransactionType::ALL {
            assert_eq!(ty.as_str().parse::<TransactionType>().unwrap(), *ty);
        }
        assert!("bonus".parse::<TransactionType>().is_err());
        assert_eq!(
            serde_json::to_string(&TransactionType::BetPlaced).unwrap(),
            "\"bet_placed\""
        );
    }

    #[test]
    fn test_ledger_context_for_bet() {
        let ctx = LedgerContext::for_bet(42, "creator stake").with("role", "creator");
        assert_eq!(ctx.bet_id, Some(42));
        assert_eq!(ctx.metadata.get("bet_id").map(String::as_str), Some("42"));
        assert_eq!(ctx.metadata.get("role").map(String::as_str), Some("creator"));
    }

    #[test]
    fn test_reversal_negates_everything() {
        let at = Utc::now();
        let lock = BalanceMovement {
            user_id: 1,
            transaction_id: 10,
            available_delta: Money::from_units(-100),
            locked_delta: Money::from_units(100),
            counters: LifetimeCounters {
                wagered: Money::from_units(100),
                ..Default::default()
            },
            settle: Some(StatusChange::new(
                TransactionStatus::Pending,
                TransactionStatus::Completed,
            )),
            at,
        };
        let undo = lock.reversal(at);
        assert_eq!(undo.available_delta, Money::from_units(100));
        assert_eq!(undo.locked_delta, Money::from_units(-100));
        assert_eq!(undo.counters.wagered, Money::from_units(-100));
        assert_eq!(undo.settle.map(|s| s.to), Some(TransactionStatus::Cancelled));
    }
}
