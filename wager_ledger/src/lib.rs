//! # Wager Ledger
//!
//! Escrow wallets and a money-conserving lifecycle engine for two-party bets.
//!
//! Every balance change goes through the wallet ledger as a write-ahead transaction followed
//! by one conditional update in storage, so no balance can go negative even with several
//! engine instances sharing a database. The lifecycle engine drives a bet through its states
//! and moves funds for it exactly once.
//!
//! ## Bet lifecycle
//!
//! - **Pending**: created, waiting for an acceptor; nothing locked
//! - **Accepted**: both stakes locked
//! - **Active / Completed**: event under way, then over
//! - **Resolved**: outcome recorded, winner paid, commission collected
//! - **Cancelled / Expired / Disputed / Refunded**: side exits
//!
//! ## Core Modules
//!
//! - [`money`]: fixed-point amounts and commission rates
//! - [`wallet`]: wallet ledger with escrow holds
//! - [`betting`]: bet aggregate, state machine, payout rules, risk limits and the engine
//! - [`audit`]: append-only audit trail
//! - [`db`]: repository traits with PostgreSQL and in-memory backends
//!
//! ## Money conservation
//!
//! On a decisive outcome the loser's stake leaves their locked balance, the winner receives
//! it minus commission and the house wallet receives the commission. The three changes always
//! sum to zero.

mod macros;

/// Append-only audit trail of bet transitions and fund movements.
pub mod audit;

/// Bet aggregate, lifecycle engine and risk limits.
pub mod betting;

pub mod clock;
pub mod config;

/// Storage layer.
pub mod db;

pub mod error;
pub mod locks;
pub mod money;

/// Wallet ledger.
pub mod wallet;

pub use betting::{
    Bet, BetEngine, BetError, BetId, BetOutcome, BetResult, BetStatus, BetType, CreateBetRequest,
    ResolveBetRequest,
};
pub use config::{BettingConfig, LedgerConfig, LimitDefaults};
pub use error::ErrorKind;
pub use money::{CommissionRate, Money};
pub use wallet::{WalletError, WalletManager, WalletResult};
