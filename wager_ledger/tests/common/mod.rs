//! Shared setup for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use wager_ledger::audit::{AuditEntry, NewAuditEntry};
use wager_ledger::betting::{
    Bet, BetEngine, BetId, BetLimit, BetResolution, BetStatistics, BetStatus, BetType,
    CreateBetRequest,
};
use wager_ledger::clock::ManualClock;
use wager_ledger::config::{BettingConfig, LedgerConfig};
use wager_ledger::db::{
    AuditRepository, BetRepository, LedgerStore, LimitRepository, MemoryRepository, StoreError,
    StoreResult, WalletRepository,
};
use wager_ledger::money::Money;
use wager_ledger::wallet::{
    BalanceMovement, LedgerContext, NewTransaction, StatusChange, Transaction,
    TransactionStatus, TransactionType, Wallet, WalletManager,
};

pub const HOUSE: i64 = 0;

/// Engine, ledger and clock over one store
pub struct TestEnv {
    pub engine: BetEngine,
    pub wallets: Arc<WalletManager>,
    pub clock: Arc<ManualClock>,
}

/// Ledger settings for tests that move more than the default daily deposit cap
pub fn roomy_ledger() -> LedgerConfig {
    LedgerConfig {
        daily_deposit_limit: Money::from_units(1_000_000),
        ..LedgerConfig::default()
    }
}

pub fn env_on(store: Arc<dyn LedgerStore>) -> TestEnv {
    env_with(store, roomy_ledger(), BettingConfig::default())
}

pub fn env_with(
    store: Arc<dyn LedgerStore>,
    ledger: LedgerConfig,
    betting: BettingConfig,
) -> TestEnv {
    let clock = Arc::new(ManualClock::default());
    let wallets = Arc::new(WalletManager::new(store.clone(), ledger).with_clock(clock.clone()));
    let engine = BetEngine::new(store, wallets.clone(), betting).with_clock(clock.clone());
    TestEnv {
        engine,
        wallets,
        clock,
    }
}

/// Fresh in-memory environment; the repository is returned for direct inspection
pub fn memory_env() -> (TestEnv, Arc<MemoryRepository>) {
    let repo = Arc::new(MemoryRepository::new());
    (env_on(repo.clone()), repo)
}

pub async fn deposit(wallets: &WalletManager, user_id: i64, units: i64) {
    wallets
        .add_funds(
            user_id,
            TransactionType::Deposit,
            Money::from_units(units),
            &LedgerContext::new("test deposit"),
        )
        .await
        .expect("deposit");
}

pub async fn balance(wallets: &WalletManager, user_id: i64) -> (Money, Money) {
    let balance = wallets.get_balance(user_id).await.expect("balance");
    (balance.available, balance.locked)
}

pub fn friend_bet(creator_id: i64, units: i64) -> CreateBetRequest {
    CreateBetRequest::new(creator_id, "Loser buys lunch", BetType::FriendBet, Money::from_units(units))
}

/// Create and accept a bet between `creator` and `acceptor`
pub async fn accepted_bet(env: &TestEnv, creator: i64, acceptor: i64, amount: Money) -> Bet {
    let request = CreateBetRequest::new(creator, "Nine ball break", BetType::Challenge, amount);
    let bet = env.engine.create_bet(request).await.expect("create bet");
    env.engine
        .accept_bet(bet.id, acceptor)
        .await
        .expect("accept bet")
}

/// Rebuild every wallet's `(available, locked)` from completed and pending transactions.
///
/// Assumes `refund` rows only come from unlocking a stake, which holds for bet flows.
pub fn replay(transactions: &[Transaction]) -> BTreeMap<i64, (Money, Money)> {
    let mut balances: BTreeMap<i64, (Money, Money)> = BTreeMap::new();
    for tx in transactions {
        let entry = balances.entry(tx.user_id).or_default();
        let amount = tx.amount;
        match (tx.status, tx.transaction_type) {
            (TransactionStatus::Completed, TransactionType::Deposit)
            | (TransactionStatus::Completed, TransactionType::BetWon)
            | (TransactionStatus::Completed, TransactionType::Fee) => entry.0 += amount,
            (TransactionStatus::Completed, TransactionType::BetPlaced) => {
                entry.0 -= amount;
                entry.1 += amount;
            }
            (TransactionStatus::Completed, TransactionType::Refund) => {
                entry.0 += amount;
                entry.1 -= amount;
            }
            (TransactionStatus::Completed, TransactionType::BetLost) => entry.1 -= amount,
            (TransactionStatus::Pending, TransactionType::Withdrawal) => {
                entry.0 -= amount;
                entry.1 += amount;
            }
            (TransactionStatus::Completed, TransactionType::Withdrawal) => entry.0 -= amount,
            _ => {}
        }
    }
    balances
}

/// Assert that stored balances match a replay of the transaction log
pub fn assert_reconciles(repo: &MemoryRepository) {
    let replayed = replay(&repo.all_transactions());
    for wallet in repo.all_wallets() {
        let expected = replayed.get(&wallet.user_id).copied().unwrap_or_default();
        assert_eq!(
            (wallet.available_balance, wallet.locked_balance),
            expected,
            "wallet of user {} does not match its transaction history",
            wallet.user_id
        );
    }
}

/// Work run by another instance in the middle of a storage call
pub type Interleaved = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Delegating store with switchable failures
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryRepository,
    /// Every bet update fails permanently
    pub fail_bet_updates: AtomicBool,
    /// Number of upcoming bet updates that fail transiently after being written
    pub transient_after_write: AtomicUsize,
    /// Settling movements on this user's wallet fail permanently
    pub fail_movements_for: Mutex<Option<i64>>,
    /// Every audit append fails
    pub fail_audit: AtomicBool,
    /// Runs in place of the next bet update, which then times out without writing
    pub before_bet_update: Mutex<Option<Interleaved>>,
    /// Number of upcoming transaction inserts that fail transiently after being written
    pub transient_after_insert: AtomicUsize,
    /// Number of upcoming audit appends that fail transiently after being written
    pub transient_after_audit: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Consume one pending injected failure, if any
fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn timed_out() -> StoreError {
    StoreError::Timeout(Duration::from_secs(5))
}

fn broken(what: &str) -> StoreError {
    StoreError::Decode(format!("injected {what} failure"))
}

#[async_trait]
impl WalletRepository for FlakyStore {
    async fn find_wallet(&self, user_id: i64) -> StoreResult<Option<Wallet>> {
        self.inner.find_wallet(user_id).await
    }

    async fn get_or_create_wallet(&self, user_id: i64) -> StoreResult<Wallet> {
        self.inner.get_or_create_wallet(user_id).await
    }

    async fn insert_transaction(&self, new: &NewTransaction) -> StoreResult<Transaction> {
        let stored = self.inner.insert_transaction(new).await?;
        if take_one(&self.transient_after_insert) {
            return Err(timed_out());
        }
        Ok(stored)
    }

    async fn insert_held_withdrawal(
        &self,
        new: &NewTransaction,
    ) -> StoreResult<(Transaction, Option<Wallet>)> {
        let stored = self.inner.insert_held_withdrawal(new).await?;
        if take_one(&self.transient_after_insert) {
            return Err(timed_out());
        }
        Ok(stored)
    }

    async fn apply_movement(&self, movement: &BalanceMovement) -> StoreResult<Option<Wallet>> {
        let blocked = *self.fail_movements_for.lock() == Some(movement.user_id);
        let forward = movement
            .settle
            .is_some_and(|change| change.from == TransactionStatus::Pending);
        if blocked && forward {
            return Err(broken("movement"));
        }
        self.inner.apply_movement(movement).await
    }

    async fn transition_transaction(
        &self,
        transaction_id: i64,
        change: StatusChange,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        self.inner
            .transition_transaction(transaction_id, change, at)
            .await
    }

    async fn find_transaction(&self, transaction_id: i64) -> StoreResult<Option<Transaction>> {
        self.inner.find_transaction(transaction_id).await
    }

    async fn list_transactions(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        self.inner.list_transactions(user_id, limit, offset).await
    }

    async fn transactions_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<Transaction>> {
        self.inner.transactions_for_bet(bet_id).await
    }

    async fn transactions_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        self.inner.transactions_since(since, limit).await
    }

    async fn sum_transactions_since(
        &self,
        user_id: i64,
        transaction_type: TransactionType,
        statuses: &[TransactionStatus],
        since: DateTime<Utc>,
    ) -> StoreResult<Money> {
        self.inner
            .sum_transactions_since(user_id, transaction_type, statuses, since)
            .await
    }
}

#[async_trait]
impl BetRepository for FlakyStore {
    async fn insert_bet(&self, bet: &Bet) -> StoreResult<Bet> {
        self.inner.insert_bet(bet).await
    }

    async fn find_bet(&self, bet_id: BetId) -> StoreResult<Option<Bet>> {
        self.inner.find_bet(bet_id).await
    }

    async fn update_bet(&self, bet: &Bet, expected_version: i64) -> StoreResult<bool> {
        if self.fail_bet_updates.load(Ordering::SeqCst) {
            return Err(broken("bet update"));
        }
        let interleaved = self.before_bet_update.lock().take();
        if let Some(rival) = interleaved {
            rival.await;
            return Err(timed_out());
        }
        let written = self.inner.update_bet(bet, expected_version).await?;
        if take_one(&self.transient_after_write) {
            return Err(timed_out());
        }
        Ok(written)
    }

    async fn insert_resolution(&self, resolution: &BetResolution) -> StoreResult<BetResolution> {
        self.inner.insert_resolution(resolution).await
    }

    async fn find_resolution(&self, bet_id: BetId) -> StoreResult<Option<BetResolution>> {
        self.inner.find_resolution(bet_id).await
    }

    async fn list_user_bets(
        &self,
        user_id: i64,
        status: Option<BetStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>> {
        self.inner
            .list_user_bets(user_id, status, limit, offset)
            .await
    }

    async fn list_bets_by_status(
        &self,
        statuses: &[BetStatus],
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>> {
        self.inner.list_bets_by_status(statuses, limit, offset).await
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<BetId>> {
        self.inner.list_expired_pending(now, limit).await
    }

    async fn user_statistics(&self, user_id: i64) -> StoreResult<BetStatistics> {
        self.inner.user_statistics(user_id).await
    }
}

#[async_trait]
impl LimitRepository for FlakyStore {
    async fn find_limit(&self, user_id: i64) -> StoreResult<Option<BetLimit>> {
        self.inner.find_limit(user_id).await
    }

    async fn save_limit(&self, limit: &BetLimit) -> StoreResult<()> {
        self.inner.save_limit(limit).await
    }
}

#[async_trait]
impl AuditRepository for FlakyStore {
    async fn append_audit(&self, entry: &NewAuditEntry) -> StoreResult<AuditEntry> {
        if self.fail_audit.load(Ordering::SeqCst) {
            return Err(broken("audit"));
        }
        let stored = self.inner.append_audit(entry).await?;
        if take_one(&self.transient_after_audit) {
            return Err(timed_out());
        }
        Ok(stored)
    }

    async fn audit_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<AuditEntry>> {
        self.inner.audit_for_bet(bet_id).await
    }

    async fn audit_since(&self, since: DateTime<Utc>, limit: i64) -> StoreResult<Vec<AuditEntry>> {
        self.inner.audit_since(since, limit).await
    }
}
