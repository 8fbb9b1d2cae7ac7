//! Wallet ledger with write-ahead transactions and escrow holds.

use super::{
    errors::{WalletError, WalletResult},
    models::{
        Balance, BalanceMovement, LedgerContext, LedgerReceipt, LifetimeCounters, NewTransaction,
        StatusChange, Transaction, TransactionStatus, TransactionType, Wallet,
    },
};
use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::db::{LedgerStore, StoreResult, retry_transient};
use crate::locks::KeyedLocks;
use crate::money::Money;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

const COMPLETE: StatusChange =
    StatusChange::new(TransactionStatus::Pending, TransactionStatus::Completed);

/// A balance change before it is written
struct Posting {
    user_id: i64,
    transaction_type: TransactionType,
    amount: Money,
    available_delta: Money,
    locked_delta: Money,
    counters: LifetimeCounters,
}

fn new_transaction(
    wallet: &Wallet,
    transaction_type: TransactionType,
    amount: Money,
    ctx: &LedgerContext,
    now: DateTime<Utc>,
) -> NewTransaction {
    NewTransaction {
        idempotency_key: Uuid::new_v4(),
        user_id: wallet.user_id,
        wallet_id: wallet.id,
        transaction_type,
        amount,
        bet_id: ctx.bet_id,
        description: (!ctx.reason.is_empty()).then(|| ctx.reason.clone()),
        metadata: ctx.metadata.clone(),
        created_at: now,
    }
}

fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

/// Wallet manager
///
/// Every movement first inserts a `pending` [`Transaction`], then applies one conditional
/// balance update that also settles that record. A rejected update leaves the record
/// `failed` and the balances untouched.
pub struct WalletManager {
    store: Arc<dyn LedgerStore>,
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
    user_locks: KeyedLocks<i64>,
}

impl WalletManager {
    /// Create a new wallet manager
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            config,
            clock: Arc::new(SystemClock),
            user_locks: KeyedLocks::new(),
        }
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// User id of the commission sink wallet
    pub fn house_user_id(&self) -> i64 {
        self.config.house_user_id
    }

    /// Get the user's wallet, creating it on first access
    pub async fn get_or_create_wallet(&self, user_id: i64) -> WalletResult<Wallet> {
        Ok(retry_transient("get_or_create_wallet", || {
            self.store.get_or_create_wallet(user_id)
        })
        .await?)
    }

    /// Consistent `(available, locked)` snapshot
    pub async fn get_balance(&self, user_id: i64) -> WalletResult<Balance> {
        Ok(self.get_or_create_wallet(user_id).await?.balance())
    }

    /// Fetch a wallet on behalf of `requesting_user`. Only the owner may read it.
    pub async fn get_wallet_for(
        &self,
        requesting_user: i64,
        target_user: i64,
    ) -> WalletResult<Wallet> {
        if requesting_user != target_user {
            log::warn!(
                "SECURITY: user {requesting_user} attempted to access wallet of user {target_user}"
            );
            return Err(WalletError::AccessDenied {
                requester: requesting_user,
                owner: target_user,
            });
        }
        self.get_or_create_wallet(target_user).await
    }

    /// Increase the available balance.
    ///
    /// Accepts `deposit`, `refund`, `bet_won` and `fee`. Deposits count against the daily
    /// deposit cap.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Wallet owner; the wallet is created on first use
    /// * `transaction_type` - Kind of credit recorded on the transaction
    /// * `amount` - Positive amount, at most `max_transaction`
    /// * `ctx` - Reason, bet id and metadata copied onto the transaction
    ///
    /// # Errors
    ///
    /// - `InvalidTransactionType`: A debit type was passed
    /// - `InvalidAmount` / `AmountExceedsLimit`: Amount not positive or above the ceiling
    /// - `DailyLimitExceeded`: The deposit would pass today's cap
    /// - `Storage`: The write-ahead record or the balance update failed
    pub async fn add_funds(
        &self,
        user_id: i64,
        transaction_type: TransactionType,
        amount: Money,
        ctx: &LedgerContext,
    ) -> WalletResult<LedgerReceipt> {
        let counters = match transaction_type {
            TransactionType::Deposit => LifetimeCounters {
                deposited: amount,
                ..Default::default()
            },
            TransactionType::BetWon => LifetimeCounters {
                won: amount,
                ..Default::default()
            },
            TransactionType::Refund | TransactionType::Fee => LifetimeCounters::default(),
            other => return Err(WalletError::InvalidTransactionType(other)),
        };
        let receipt = self
            .post(
                Posting {
                    user_id,
                    transaction_type,
                    amount,
                    available_delta: amount,
                    locked_delta: Money::ZERO,
                    counters,
                },
                ctx,
            )
            .await?;
        if transaction_type == TransactionType::Deposit {
            log::info!("Deposited {amount} for user {user_id}: {}", ctx.reason);
        }
        Ok(receipt)
    }

    /// Move `amount` from available into locked
    ///
    /// # Errors
    ///
    /// - `InsufficientFunds`: Available balance is below `amount`; the record is left `failed`
    pub async fn lock_funds(
        &self,
        user_id: i64,
        amount: Money,
        ctx: &LedgerContext,
    ) -> WalletResult<LedgerReceipt> {
        self.post(
            Posting {
                user_id,
                transaction_type: TransactionType::BetPlaced,
                amount,
                available_delta: -amount,
                locked_delta: amount,
                counters: LifetimeCounters {
                    wagered: amount,
                    ..Default::default()
                },
            },
            ctx,
        )
        .await
    }

    /// Move `amount` from locked back into available
    pub async fn unlock_funds(
        &self,
        user_id: i64,
        amount: Money,
        ctx: &LedgerContext,
    ) -> WalletResult<LedgerReceipt> {
        self.post(
            Posting {
                user_id,
                transaction_type: TransactionType::Refund,
                amount,
                available_delta: amount,
                locked_delta: -amount,
                counters: LifetimeCounters::default(),
            },
            ctx,
        )
        .await
    }

    /// Credit winnings taken from the counterpart's locked stake
    pub async fn credit_win(
        &self,
        user_id: i64,
        amount: Money,
        ctx: &LedgerContext,
    ) -> WalletResult<LedgerReceipt> {
        self.add_funds(user_id, TransactionType::BetWon, amount, ctx)
            .await
    }

    /// Permanently remove a lost stake from the locked balance
    pub async fn debit_loss(
        &self,
        user_id: i64,
        amount: Money,
        ctx: &LedgerContext,
    ) -> WalletResult<LedgerReceipt> {
        self.post(
            Posting {
                user_id,
                transaction_type: TransactionType::BetLost,
                amount,
                available_delta: Money::ZERO,
                locked_delta: -amount,
                counters: LifetimeCounters::default(),
            },
            ctx,
        )
        .await
    }

    /// Credit commission to the house wallet
    pub async fn collect_commission(
        &self,
        amount: Money,
        ctx: &LedgerContext,
    ) -> WalletResult<LedgerReceipt> {
        self.add_funds(self.config.house_user_id, TransactionType::Fee, amount, ctx)
            .await
    }

    /// Undo a completed movement. Its transaction is marked `cancelled` in the same
    /// storage step that restores the balances.
    ///
    /// # Errors
    ///
    /// - `InvalidTransactionState`: The movement was already reversed
    /// - `InsufficientFunds` / `InsufficientLocked`: The funds have since moved on
    pub async fn reverse(&self, receipt: &LedgerReceipt, reason: &str) -> WalletResult<Wallet> {
        let user_id = receipt.movement.user_id;
        let _guard = self.user_locks.acquire(&user_id).await;
        let movement = receipt.movement.reversal(self.clock.now());
        let reversed = self
            .settle(receipt.transaction.clone(), movement, false)
            .await?;
        log::warn!(
            "Reversed {} transaction {} for user {user_id}: {reason}",
            receipt.transaction.transaction_type,
            receipt.transaction.id
        );
        Ok(reversed.wallet)
    }

    /// Create a `pending` withdrawal and hold its amount in the locked balance until the
    /// payout is confirmed or cancelled.
    ///
    /// # Arguments
    ///
    /// * `user_id` - Wallet owner
    /// * `amount` - Amount to pay out
    /// * `ctx` - Reason and payment metadata
    ///
    /// # Returns
    ///
    /// The `pending` withdrawal, to be passed to [`Self::complete_withdrawal`] or
    /// [`Self::cancel_withdrawal`]
    ///
    /// # Errors
    ///
    /// - `DailyLimitExceeded`: Pending and completed withdrawals today would pass the cap
    /// - `InsufficientFunds`: Available balance is short; the record is stored `failed`
    pub async fn request_withdrawal(
        &self,
        user_id: i64,
        amount: Money,
        ctx: &LedgerContext,
    ) -> WalletResult<Transaction> {
        self.validate_amount(amount)?;
        let _guard = self.user_locks.acquire(&user_id).await;
        let now = self.clock.now();
        let wallet = self.get_or_create_wallet(user_id).await?;
        self.check_daily_cap(
            user_id,
            TransactionType::Withdrawal,
            &[TransactionStatus::Pending, TransactionStatus::Completed],
            amount,
            self.config.daily_withdrawal_limit,
            now,
        )
        .await?;

        // Record and hold commit together
        let new = new_transaction(&wallet, TransactionType::Withdrawal, amount, ctx, now);
        let (record, held) = retry_transient("insert_held_withdrawal", || {
            self.store.insert_held_withdrawal(&new)
        })
        .await?;
        if held.is_none() {
            let hold = BalanceMovement {
                user_id,
                transaction_id: record.id,
                available_delta: -amount,
                locked_delta: amount,
                counters: LifetimeCounters::default(),
                settle: None,
                at: now,
            };
            return Err(self.rejection(&hold, &record).await);
        }
        log::info!(
            "Withdrawal {} of {amount} requested by user {user_id}",
            record.id
        );
        Ok(record)
    }

    /// Payout confirmed: drop the held amount and mark the withdrawal completed
    pub async fn complete_withdrawal(&self, transaction_id: i64) -> WalletResult<LedgerReceipt> {
        let pending = self.pending_withdrawal(transaction_id).await?;
        let _guard = self.user_locks.acquire(&pending.user_id).await;
        let movement = BalanceMovement {
            user_id: pending.user_id,
            transaction_id,
            available_delta: Money::ZERO,
            locked_delta: -pending.amount,
            counters: LifetimeCounters {
                withdrawn: pending.amount,
                ..Default::default()
            },
            settle: Some(COMPLETE),
            at: self.clock.now(),
        };
        let receipt = self.settle(pending, movement, false).await?;
        log::info!(
            "Withdrawal {transaction_id} of {} completed for user {}",
            receipt.transaction.amount,
            receipt.transaction.user_id
        );
        Ok(receipt)
    }

    /// Payout abandoned: release the hold and mark the withdrawal cancelled
    pub async fn cancel_withdrawal(&self, transaction_id: i64) -> WalletResult<LedgerReceipt> {
        let pending = self.pending_withdrawal(transaction_id).await?;
        let _guard = self.user_locks.acquire(&pending.user_id).await;
        let movement = BalanceMovement {
            user_id: pending.user_id,
            transaction_id,
            available_delta: pending.amount,
            locked_delta: -pending.amount,
            counters: LifetimeCounters::default(),
            settle: Some(StatusChange::new(
                TransactionStatus::Pending,
                TransactionStatus::Cancelled,
            )),
            at: self.clock.now(),
        };
        let receipt = self.settle(pending, movement, false).await?;
        log::info!("Withdrawal {transaction_id} cancelled");
        Ok(receipt)
    }

    /// A user's transactions, newest first
    pub async fn get_transactions(
        &self,
        user_id: i64,
        limit: i64,
        offset: i64,
    ) -> WalletResult<Vec<Transaction>> {
        Ok(self.store.list_transactions(user_id, limit, offset).await?)
    }

    /// Reconciliation feed: all transactions since `since`, oldest first
    pub async fn transactions_since(
        &self,
        since: DateTime<Utc>,
        limit: i64,
    ) -> WalletResult<Vec<Transaction>> {
        Ok(self.store.transactions_since(since, limit).await?)
    }

    fn validate_amount(&self, amount: Money) -> WalletResult<()> {
        if !amount.is_positive() {
            return Err(WalletError::InvalidAmount(amount));
        }
        if amount > self.config.max_transaction {
            return Err(WalletError::AmountExceedsLimit {
                amount,
                max: self.config.max_transaction,
            });
        }
        Ok(())
    }

    async fn check_daily_cap(
        &self,
        user_id: i64,
        transaction_type: TransactionType,
        statuses: &[TransactionStatus],
        amount: Money,
        limit: Money,
        now: DateTime<Utc>,
    ) -> WalletResult<()> {
        let used = self
            .store
            .sum_transactions_since(user_id, transaction_type, statuses, start_of_day(now))
            .await?;
        if used.checked_add(amount).is_none_or(|total| total > limit) {
            return Err(WalletError::DailyLimitExceeded {
                kind: match transaction_type {
                    TransactionType::Withdrawal => "withdrawal",
                    _ => "deposit",
                },
                used,
                limit,
            });
        }
        Ok(())
    }

    async fn insert_pending(
        &self,
        wallet: &Wallet,
        transaction_type: TransactionType,
        amount: Money,
        ctx: &LedgerContext,
        now: DateTime<Utc>,
    ) -> StoreResult<Transaction> {
        let new = new_transaction(wallet, transaction_type, amount, ctx, now);
        // Safe to repeat: a second insert under the same key returns the first row
        retry_transient("insert_transaction", || self.store.insert_transaction(&new)).await
    }

    /// Write-ahead record, then one conditional update that completes it
    async fn post(&self, posting: Posting, ctx: &LedgerContext) -> WalletResult<LedgerReceipt> {
        self.validate_amount(posting.amount)?;
        let _guard = self.user_locks.acquire(&posting.user_id).await;
        let now = self.clock.now();
        let wallet = self.get_or_create_wallet(posting.user_id).await?;

        if posting.transaction_type == TransactionType::Deposit {
            self.check_daily_cap(
                posting.user_id,
                TransactionType::Deposit,
                &[TransactionStatus::Completed],
                posting.amount,
                self.config.daily_deposit_limit,
                now,
            )
            .await?;
        }

        let pending = self
            .insert_pending(&wallet, posting.transaction_type, posting.amount, ctx, now)
            .await?;
        let movement = BalanceMovement {
            user_id: posting.user_id,
            transaction_id: pending.id,
            available_delta: posting.available_delta,
            locked_delta: posting.locked_delta,
            counters: posting.counters,
            settle: Some(COMPLETE),
            at: now,
        };
        self.settle(pending, movement, true).await
    }

    /// Apply a movement that carries a status change.
    ///
    /// `write_ahead` marks `transaction` as a record created for this movement, which is
    /// failed when the update is rejected.
    async fn settle(
        &self,
        mut transaction: Transaction,
        movement: BalanceMovement,
        write_ahead: bool,
    ) -> WalletResult<LedgerReceipt> {
        let applied = match self.store.apply_movement(&movement).await {
            Err(err) if err.is_transient() => {
                log::warn!("apply_movement failed transiently, retrying once: {err}");
                match self.store.apply_movement(&movement).await {
                    // The first attempt may have committed before failing
                    Ok(None) => self.already_applied(&movement).await,
                    other => other.map_err(WalletError::from),
                }
            }
            other => other.map_err(WalletError::from),
        };

        let wallet = match applied {
            Ok(Some(wallet)) => wallet,
            Ok(None) => {
                if write_ahead {
                    self.mark_failed(&transaction, movement.at).await;
                }
                return Err(self.rejection(&movement, &transaction).await);
            }
            Err(err) => {
                if write_ahead {
                    self.mark_failed(&transaction, movement.at).await;
                }
                return Err(err);
            }
        };

        if let Some(change) = movement.settle {
            transaction.status = change.to;
            if change.to == TransactionStatus::Completed {
                transaction.completed_at = Some(movement.at);
            }
        }
        log::debug!(
            "{} {} for user {} (tx {}): available {}, locked {}",
            transaction.transaction_type,
            transaction.amount,
            transaction.user_id,
            transaction.id,
            wallet.available_balance,
            wallet.locked_balance
        );
        Ok(LedgerReceipt {
            transaction,
            wallet,
            movement,
        })
    }

    /// Wallet state if the movement's status change is already in place
    async fn already_applied(&self, movement: &BalanceMovement) -> WalletResult<Option<Wallet>> {
        let Some(change) = movement.settle else {
            return Ok(None);
        };
        let current = self.store.find_transaction(movement.transaction_id).await?;
        match current {
            Some(tx) if tx.status == change.to => {
                Ok(self.store.find_wallet(movement.user_id).await?)
            }
            _ => Ok(None),
        }
    }

    async fn mark_failed(&self, transaction: &Transaction, at: DateTime<Utc>) {
        let change = StatusChange::new(TransactionStatus::Pending, TransactionStatus::Failed);
        if let Err(err) = self
            .store
            .transition_transaction(transaction.id, change, at)
            .await
        {
            log::error!(
                "Failed to mark transaction {} as failed: {err}",
                transaction.id
            );
        }
    }

    /// Explain why the store rejected a movement
    async fn rejection(&self, movement: &BalanceMovement, transaction: &Transaction) -> WalletError {
        let wallet = match self.store.find_wallet(movement.user_id).await {
            Ok(Some(wallet)) => wallet,
            Ok(None) => return WalletError::WalletNotFound(movement.user_id),
            Err(err) => return err.into(),
        };
        let short = |balance: Money, delta: Money| {
            balance.checked_add(delta).is_some_and(Money::is_negative)
        };
        if short(wallet.available_balance, movement.available_delta) {
            return WalletError::InsufficientFunds {
                user_id: movement.user_id,
                available: wallet.available_balance,
                required: -movement.available_delta,
            };
        }
        if short(wallet.locked_balance, movement.locked_delta) {
            return WalletError::InsufficientLocked {
                user_id: movement.user_id,
                locked: wallet.locked_balance,
                required: -movement.locked_delta,
            };
        }
        if let Some(change) = movement.settle {
            if let Ok(Some(current)) = self.store.find_transaction(transaction.id).await {
                return WalletError::InvalidTransactionState {
                    id: transaction.id,
                    expected: change.from,
                    actual: current.status,
                };
            }
        }
        WalletError::TransactionFailed(format!(
            "balance update for transaction {} was rejected",
            transaction.id
        ))
    }

    async fn pending_withdrawal(&self, transaction_id: i64) -> WalletResult<Transaction> {
        let transaction = self
            .store
            .find_transaction(transaction_id)
            .await?
            .ok_or(WalletError::TransactionNotFound(transaction_id))?;
        if transaction.transaction_type != TransactionType::Withdrawal {
            return Err(WalletError::InvalidTransactionType(
                transaction.transaction_type,
            ));
        }
        if transaction.status != TransactionStatus::Pending {
            return Err(WalletError::InvalidTransactionState {
                id: transaction_id,
                expected: TransactionStatus::Pending,
                actual: transaction.status,
            });
        }
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryRepository, WalletRepository};

    fn manager() -> (Arc<MemoryRepository>, WalletManager) {
        let repo = Arc::new(MemoryRepository::new());
        let wallets = WalletManager::new(repo.clone(), LedgerConfig::default());
        (repo, wallets)
    }

    fn ctx() -> LedgerContext {
        LedgerContext::new("test")
    }

    #[tokio::test]
    async fn test_deposit_then_lock_and_unlock() {
        let (_, wallets) = manager();
        wallets
            .add_funds(1, TransactionType::Deposit, Money::from_units(100), &ctx())
            .await
            .unwrap();
        wallets.lock_funds(1, Money::from_units(40), &ctx()).await.unwrap();

        let balance = wallets.get_balance(1).await.unwrap();
        assert_eq!(balance.available, Money::from_units(60));
        assert_eq!(balance.locked, Money::from_units(40));

        wallets.unlock_funds(1, Money::from_units(40), &ctx()).await.unwrap();
        let balance = wallets.get_balance(1).await.unwrap();
        assert_eq!(balance.available, Money::from_units(100));
        assert_eq!(balance.locked, Money::ZERO);
    }

    #[tokio::test]
    async fn test_failed_lock_leaves_failed_record() {
        let (repo, wallets) = manager();
        wallets
            .add_funds(1, TransactionType::Deposit, Money::from_units(10), &ctx())
            .await
            .unwrap();

        let err = wallets
            .lock_funds(1, Money::from_units(11), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientFunds { .. }));

        let txs = repo.all_transactions();
        assert_eq!(txs.len(), 2);
        assert_eq!(txs[1].status, TransactionStatus::Failed);
        assert_eq!(
            wallets.get_balance(1).await.unwrap().available,
            Money::from_units(10)
        );
    }

    #[tokio::test]
    async fn test_unlock_more_than_locked() {
        let (_, wallets) = manager();
        let err = wallets
            .unlock_funds(1, Money::from_units(5), &ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::InsufficientLocked { .. }));
    }

    #[tokio::test]
    async fn test_amount_validation() {
        let (_, wallets) = manager();
        assert!(matches!(
            wallets.lock_funds(1, Money::ZERO, &ctx()).await,
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(matches!(
            wallets
                .add_funds(1, TransactionType::Deposit, Money::from_units(2_000_000), &ctx())
                .await,
            Err(WalletError::AmountExceedsLimit { .. })
        ));
        assert!(matches!(
            wallets
                .add_funds(1, TransactionType::BetLost, Money::from_units(1), &ctx())
                .await,
            Err(WalletError::InvalidTransactionType(TransactionType::BetLost))
        ));
    }

    #[tokio::test]
    async fn test_cross_user_access_denied() {
        let (_, wallets) = manager();
        assert!(wallets.get_wallet_for(1, 1).await.is_ok());
        let err = wallets.get_wallet_for(1, 2).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::AccessDenied {
                requester: 1,
                owner: 2
            }
        ));
    }

    #[tokio::test]
    async fn test_reverse_restores_balance_and_cancels_record() {
        let (repo, wallets) = manager();
        wallets
            .add_funds(1, TransactionType::Deposit, Money::from_units(50), &ctx())
            .await
            .unwrap();
        let lock = wallets.lock_funds(1, Money::from_units(20), &ctx()).await.unwrap();

        let wallet = wallets.reverse(&lock, "test").await.unwrap();
        assert_eq!(wallet.available_balance, Money::from_units(50));
        assert_eq!(wallet.locked_balance, Money::ZERO);
        assert_eq!(wallet.total_wagered, Money::ZERO);

        let stored = repo.find_transaction(lock.transaction.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TransactionStatus::Cancelled);

        // Cannot be reversed twice
        assert!(wallets.reverse(&lock, "again").await.is_err());
    }
}
