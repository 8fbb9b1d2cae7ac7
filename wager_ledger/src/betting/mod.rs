//! Peer-to-peer bets: the bet aggregate, its state machine and the lifecycle engine.
//!
//! A bet is created `pending` with no funds locked. Acceptance locks the same stake in both
//! wallets; resolution, cancellation or refund releases or distributes them exactly once.
//!
//! ## Example
//!
//! ```no_run
//! use wager_ledger::betting::{BetEngine, BetOutcome, BetType, CreateBetRequest, ResolveBetRequest};
//! use wager_ledger::config::{BettingConfig, LedgerConfig};
//! use wager_ledger::db::{LedgerStore, MemoryRepository};
//! use wager_ledger::money::Money;
//! use wager_ledger::wallet::WalletManager;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store: Arc<dyn LedgerStore> = Arc::new(MemoryRepository::new());
//!     let wallets = Arc::new(WalletManager::new(store.clone(), LedgerConfig::default()));
//!     let engine = BetEngine::new(store, wallets, BettingConfig::default());
//!
//!     let request = CreateBetRequest::new(1, "Bank shot", BetType::TrickShot, Money::from_units(20));
//!     let bet = engine.create_bet(request).await?;
//!     engine.accept_bet(bet.id, 2).await?;
//!     engine
//!         .resolve_bet(ResolveBetRequest::manual(bet.id, BetOutcome::WinnerA, 1))
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod errors;
pub mod limits;
pub mod models;
pub mod payout;
pub mod state_machine;

pub use engine::{BetEngine, SweepReport};
pub use errors::{BetError, BetResult};
pub use limits::{BetLimit, LimitManager, LimitWindow, WindowUsage};
pub use models::{
    Bet, BetId, BetOutcome, BetParticipant, BetQuery, BetResolution, BetStatistics, BetStatus,
    BetType, CreateBetRequest, ParticipantRole, ResolutionData, ResolutionMethod,
    ResolveBetRequest,
};
pub use payout::{LedgerStep, PayoutTerms, SettlementPlan, settlement_plan};
