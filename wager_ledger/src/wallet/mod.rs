//! Wallet module providing escrow balances over a write-ahead transaction ledger.
//!
//! This module implements:
//! - One wallet per user with `available` and `locked` balances, created lazily
//! - A `pending` transaction written before every balance change, then settled
//! - Conditional updates in the store so no balance can go negative
//! - Withdrawal holds and daily deposit/withdrawal caps
//!
//! ## Example
//!
//! ```no_run
//! use wager_ledger::config::LedgerConfig;
//! use wager_ledger::db::MemoryRepository;
//! use wager_ledger::money::Money;
//! use wager_ledger::wallet::{LedgerContext, TransactionType, WalletManager};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let wallets = WalletManager::new(Arc::new(MemoryRepository::new()), LedgerConfig::default());
//!
//!     let ctx = LedgerContext::new("card payment").with("payment_ref", "pi_123");
//!     wallets
//!         .add_funds(1, TransactionType::Deposit, Money::from_units(250), &ctx)
//!         .await?;
//!
//!     let balance = wallets.get_balance(1).await?;
//!     println!("available {}, locked {}", balance.available, balance.locked);
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{WalletError, WalletResult};
pub use manager::WalletManager;
pub use models::{
    Balance, BalanceMovement, LedgerContext, LedgerMetadata, LedgerReceipt, LifetimeCounters,
    NewTransaction, StatusChange, Transaction, TransactionStatus, TransactionType, Wallet,
};
