//! In-process repository.
//!
//! All tables sit behind one mutex, so every trait call is atomic the same way a single
//! PostgreSQL transaction is. Suitable for a single-instance deployment and for tests.

use super::errors::{StoreError, StoreResult};
use super::repository::{AuditRepository, BetRepository, LimitRepository, WalletRepository};
use crate::audit::{AuditEntry, NewAuditEntry};
use crate::betting::{
    Bet, BetId, BetLimit, BetParticipant, BetResolution, BetStatistics, BetStatus,
};
use crate::money::Money;
use crate::wallet::{
    BalanceMovement, NewTransaction, StatusChange, Transaction, TransactionStatus,
    TransactionType, Wallet,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    wallets: HashMap<i64, Wallet>,
    /// Index is `id - 1`
    transactions: Vec<Transaction>,
    transaction_keys: HashMap<Uuid, i64>,
    bets: BTreeMap<BetId, Bet>,
    resolutions: HashMap<BetId, BetResolution>,
    limits: HashMap<i64, BetLimit>,
    /// Index is `id - 1`
    audit: Vec<AuditEntry>,
    audit_keys: HashMap<Uuid, i64>,
    next_wallet_id: i64,
    next_bet_id: i64,
    next_participant_id: i64,
    next_resolution_id: i64,
}

impl Tables {
    fn transaction_mut(&mut self, id: i64) -> Option<&mut Transaction> {
        usize::try_from(id - 1)
            .ok()
            .and_then(|idx| self.transactions.get_mut(idx))
    }

    /// Insert a `pending` record, or return the one already stored under the same key.
    /// The flag is true for a fresh insert.
    fn insert_transaction(&mut self, new: &NewTransaction) -> (Transaction, bool) {
        if let Some(&id) = self.transaction_keys.get(&new.idempotency_key) {
            if let Some(existing) = self.transaction_mut(id) {
                return (existing.clone(), false);
            }
        }
        let transaction = Transaction {
            id: self.transactions.len() as i64 + 1,
            user_id: new.user_id,
            wallet_id: new.wallet_id,
            transaction_type: new.transaction_type,
            amount: new.amount,
            status: TransactionStatus::Pending,
            bet_id: new.bet_id,
            description: new.description.clone(),
            metadata: new.metadata.clone(),
            created_at: new.created_at,
            completed_at: None,
        };
        self.transaction_keys.insert(new.idempotency_key, transaction.id);
        self.transactions.push(transaction.clone());
        (transaction, true)
    }

    fn assign_participant_ids(&mut self, bet: &mut Bet) {
        for participant in &mut bet.participants {
            participant.bet_id = bet.id;
            if participant.id == 0 {
                self.next_participant_id += 1;
                participant.id = self.next_participant_id;
            }
        }
    }
}

fn settle(transaction: &mut Transaction, change: StatusChange, at: DateTime<Utc>) {
    transaction.status = change.to;
    if change.to == TransactionStatus::Completed {
        transaction.completed_at = Some(at);
    }
}

fn newest_first(bets: impl Iterator<Item = Bet>, limit: i64, offset: i64) -> Vec<Bet> {
    let mut bets: Vec<Bet> = bets.collect();
    bets.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    bets.into_iter()
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

fn active_participant(bet: &Bet, user_id: i64) -> Option<&BetParticipant> {
    bet.participants
        .iter()
        .find(|p| p.user_id == user_id && p.is_active)
}

/// Repository backed by process memory
#[derive(Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored transaction, oldest first
    pub fn all_transactions(&self) -> Vec<Transaction> {
        self.tables.lock().transactions.clone()
    }

    /// Every wallet, ordered by user id
    pub fn all_wallets(&self) -> Vec<Wallet> {
        let mut wallets: Vec<Wallet> = self.tables.lock().wallets.values().cloned().collect();
        wallets.sort_by_key(|w| w.user_id);
        wallets
    }
}

#[async_trait]
impl WalletRepository for MemoryRepository {
    async fn find_wallet(&self, user_id: i64) -> StoreResult<Option<Wallet>> {
        Ok(self.tables.lock().wallets.get(&user_id).cloned())
    }

    async fn get_or_create_wallet(&self, user_id: i64) -> StoreResult<Wallet> {
        let mut tables = self.tables.lock();
        if let Some(wallet) = tables.wallets.get(&user_id) {
            return Ok(wallet.clone());
        }
        tables.next_wallet_id += 1;
        let now = Utc::now();
        let wallet = Wallet {
            id: tables.next_wallet_id,
            user_id,
            available_balance: Money::ZERO,
            locked_balance: Money::ZERO,
            total_deposited: Money::ZERO,
            total_withdrawn: Money::ZERO,
            total_wagered: Money::ZERO,
            total_won: Money::ZERO,
            created_at: now,
            updated_at: now,
        };
        tables.wallets.insert(user_id, wallet.clone());
        Ok(wallet)
    }

    async fn insert_transaction(&self, new: &NewTransaction) -> StoreResult<Transaction> {
        Ok(self.tables.lock().insert_transaction(new).0)
    }

    async fn insert_held_withdrawal(
        &self,
        new: &NewTransaction,
    ) -> StoreResult<(Transaction, Option<Wallet>)> {
        let mut tables = self.tables.lock();
        let (mut transaction, fresh) = tables.insert_transaction(new);
        if !fresh {
            let wallet = match transaction.status {
                TransactionStatus::Failed => None,
                _ => tables.wallets.get(&new.user_id).cloned(),
            };
            return Ok((transaction, wallet));
        }

        let held = tables.wallets.get_mut(&new.user_id).and_then(|wallet| {
            let available = wallet.available_balance.checked_sub(new.amount)?;
            let locked = wallet.locked_balance.checked_add(new.amount)?;
            if available.is_negative() {
                return None;
            }
            wallet.available_balance = available;
            wallet.locked_balance = locked;
            wallet.updated_at = new.created_at;
            Some(wallet.clone())
        });
        if held.is_none() {
            let change = StatusChange::new(TransactionStatus::Pending, TransactionStatus::Failed);
            if let Some(stored) = tables.transaction_mut(transaction.id) {
                settle(stored, change, new.created_at);
                transaction = stored.clone();
            }
        }
        Ok((transaction, held))
    }

    async fn apply_movement(&self, movement: &BalanceMovement) -> StoreResult<Option<Wallet>> {
        let mut tables = self.tables.lock();

        if let Some(change) = movement.settle {
            match tables.transaction_mut(movement.transaction_id) {
                Some(tx) if tx.status == change.from => {}
                _ => return Ok(None),
            }
        }

        let Some(wallet) = tables.wallets.get_mut(&movement.user_id) else {
            return Ok(None);
        };
        let counters = movement.counters;
        let updated = (
            wallet.available_balance.checked_add(movement.available_delta),
            wallet.locked_balance.checked_add(movement.locked_delta),
            wallet.total_deposited.checked_add(counters.deposited),
            wallet.total_withdrawn.checked_add(counters.withdrawn),
            wallet.total_wagered.checked_add(counters.wagered),
            wallet.total_won.checked_add(counters.won),
        );
        let (
            Some(available),
            Some(locked),
            Some(deposited),
            Some(withdrawn),
            Some(wagered),
            Some(won),
        ) = updated
        else {
            return Ok(None);
        };
        if available.is_negative() || locked.is_negative() {
            return Ok(None);
        }

        wallet.available_balance = available;
        wallet.locked_balance = locked;
        wallet.total_deposited = deposited;
        wallet.total_withdrawn = withdrawn;
        wallet.total_wagered = wagered;
        wallet.total_won = won;
        wallet.updated_at = movement.at;
        let wallet = wallet.clone();

        if let Some(change) = movement.settle {
            if let Some(tx) = tables.transaction_mut(movement.transaction_id) {
                settle(tx, change, movement.at);
            }
        }
        Ok(Some(wallet))
    }

    async fn transition_transaction(
        &self,
        transaction_id: i64,
        change: StatusChange,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        match tables.transaction_mut(transaction_id) {
            Some(tx) if tx.status == change.from => {
                settle(tx, change, at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_transaction(&self, transaction_id: i64) -> StoreResult<Option<Transaction>> {
        Ok(self
            .tables
            .lock()
            .transaction_mut(transaction_id)
            .map(|tx| tx.clone()))
    }

    async fn list_transactions(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let tables = self.tables.lock();
        Ok(tables
            .transactions
            .iter()
            .rev()
            .filter(|tx| tx.user_id == user_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn transactions_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<Transaction>> {
        let tables = self.tables.lock();
        Ok(tables
            .transactions
            .iter()
            .filter(|tx| tx.bet_id == Some(bet_id))
            .cloned()
            .collect())
    }

    async fn transactions_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transaction>> {
        let tables = self.tables.lock();
        let mut rows: Vec<Transaction> = tables
            .transactions
            .iter()
            .filter(|tx| tx.created_at >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn sum_transactions_since(
        &self,
        user_id: i64,
        transaction_type: TransactionType,
        statuses: &[TransactionStatus],
        since: DateTime<Utc>,
    ) -> StoreResult<Money> {
        let tables = self.tables.lock();
        tables
            .transactions
            .iter()
            .filter(|tx| {
                tx.user_id == user_id
                    && tx.transaction_type == transaction_type
                    && statuses.contains(&tx.status)
                    && tx.created_at >= since
            })
            .try_fold(Money::ZERO, |total, tx| total.checked_add(tx.amount))
            .ok_or_else(|| {
                StoreError::Decode(format!("transaction sum for user {user_id} overflows"))
            })
    }
}

#[async_trait]
impl BetRepository for MemoryRepository {
    async fn insert_bet(&self, bet: &Bet) -> StoreResult<Bet> {
        let mut tables = self.tables.lock();
        tables.next_bet_id += 1;
        let mut stored = bet.clone();
        stored.id = tables.next_bet_id;
        tables.assign_participant_ids(&mut stored);
        tables.bets.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find_bet(&self, bet_id: BetId) -> StoreResult<Option<Bet>> {
        Ok(self.tables.lock().bets.get(&bet_id).cloned())
    }

    async fn update_bet(&self, bet: &Bet, expected_version: i64) -> StoreResult<bool> {
        let mut tables = self.tables.lock();
        match tables.bets.get(&bet.id) {
            Some(current) if current.version == expected_version => {}
            _ => return Ok(false),
        }
        let mut stored = bet.clone();
        tables.assign_participant_ids(&mut stored);
        tables.bets.insert(stored.id, stored);
        Ok(true)
    }

    async fn insert_resolution(&self, resolution: &BetResolution) -> StoreResult<BetResolution> {
        let mut tables = self.tables.lock();
        tables.next_resolution_id += 1;
        let mut stored = resolution.clone();
        stored.id = tables.next_resolution_id;
        tables.resolutions.insert(stored.bet_id, stored.clone());
        Ok(stored)
    }

    async fn find_resolution(&self, bet_id: BetId) -> StoreResult<Option<BetResolution>> {
        Ok(self.tables.lock().resolutions.get(&bet_id).cloned())
    }

    async fn list_user_bets(
        &self,
        user_id: i64,
        status: Option<BetStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>> {
        let tables = self.tables.lock();
        let bets = tables
            .bets
            .values()
            .filter(|bet| {
                bet.created_by == user_id || bet.participants.iter().any(|p| p.user_id == user_id)
            })
            .filter(|bet| status.is_none_or(|s| bet.status == s))
            .cloned();
        Ok(newest_first(bets, limit, offset))
    }

    async fn list_bets_by_status(
        &self,
        statuses: &[BetStatus],
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Bet>> {
        let tables = self.tables.lock();
        let bets = tables
            .bets
            .values()
            .filter(|bet| statuses.contains(&bet.status))
            .cloned();
        Ok(newest_first(bets, limit, offset))
    }

    async fn list_expired_pending(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<BetId>> {
        let tables = self.tables.lock();
        let mut expired: Vec<(DateTime<Utc>, BetId)> = tables
            .bets
            .values()
            .filter(|bet| bet.status == BetStatus::Pending && bet.expires_at < now)
            .map(|bet| (bet.expires_at, bet.id))
            .collect();
        expired.sort();
        Ok(expired
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn user_statistics(&self, user_id: i64) -> StoreResult<BetStatistics> {
        let tables = self.tables.lock();
        let mut stats = BetStatistics::default();
        let mut settled_stakes = Money::ZERO;
        for bet in tables.bets.values() {
            let Some(participant) = active_participant(bet, user_id) else {
                continue;
            };
            *stats.status_counts.entry(bet.status).or_insert(0) += 1;
            stats.total_bet_amount += participant.stake_amount;
            if let Some(won) = participant.actual_winnings {
                stats.total_winnings += won;
                settled_stakes += participant.stake_amount;
            }
        }
        stats.net_profit = stats.total_winnings - settled_stakes;
        Ok(stats)
    }
}

#[async_trait]
impl LimitRepository for MemoryRepository {
    async fn find_limit(&self, user_id: i64) -> StoreResult<Option<BetLimit>> {
        Ok(self.tables.lock().limits.get(&user_id).cloned())
    }

    async fn save_limit(&self, limit: &BetLimit) -> StoreResult<()> {
        self.tables.lock().limits.insert(limit.user_id, limit.clone());
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for MemoryRepository {
    async fn append_audit(&self, entry: &NewAuditEntry) -> StoreResult<AuditEntry> {
        let mut tables = self.tables.lock();
        if let Some(&id) = tables.audit_keys.get(&entry.idempotency_key) {
            let existing = usize::try_from(id - 1)
                .ok()
                .and_then(|idx| tables.audit.get(idx));
            if let Some(existing) = existing {
                return Ok(existing.clone());
            }
        }
        let stored = AuditEntry {
            id: tables.audit.len() as i64 + 1,
            bet_id: entry.bet_id,
            user_id: entry.user_id,
            action: entry.action,
            old_value: entry.old_value.clone(),
            new_value: entry.new_value.clone(),
            reason: entry.reason.clone(),
            created_at: entry.created_at,
        };
        tables.audit_keys.insert(entry.idempotency_key, stored.id);
        tables.audit.push(stored.clone());
        Ok(stored)
    }

    async fn audit_for_bet(&self, bet_id: BetId) -> StoreResult<Vec<AuditEntry>> {
        let tables = self.tables.lock();
        Ok(tables
            .audit
            .iter()
            .filter(|entry| entry.bet_id == bet_id)
            .cloned()
            .collect())
    }

    async fn audit_since(&self, since: DateTime<Utc>, limit: i64) -> StoreResult<Vec<AuditEntry>> {
        let tables = self.tables.lock();
        let mut rows: Vec<AuditEntry> = tables
            .audit
            .iter()
            .filter(|entry| entry.created_at >= since)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}
