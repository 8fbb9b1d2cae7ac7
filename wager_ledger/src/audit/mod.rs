//! Append-only record of bet transitions and the fund movements made for them.
//!
//! Together with the transaction table this is enough to rebuild the full fund history
//! of any bet and to reconcile wallet balances by replay.

pub mod models;
pub mod trail;

pub use models::{AuditAction, AuditEntry, NewAuditEntry};
pub use trail::{AuditLog, bet_snapshot, movement_snapshot};
