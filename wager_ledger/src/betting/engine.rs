//! Bet lifecycle engine.
//!
//! Every mutating operation runs under a per-bet lock and follows the same sequence: load,
//! validate against the state machine, move funds through the wallet ledger, persist the new
//! bet state behind a version guard, then write audit rows. Funds moved before a failure are
//! reversed in the opposite order before the error is returned.

use super::errors::{BetError, BetResult};
use super::limits::{BetLimit, LimitManager};
use super::models::{
    Bet, BetId, BetOutcome, BetParticipant, BetQuery, BetResolution, BetStatistics, BetStatus,
    CreateBetRequest, ParticipantRole, ResolveBetRequest,
};
use super::payout::{LedgerStep, PayoutTerms};
use crate::audit::{AuditAction, AuditEntry, AuditLog, bet_snapshot};
use crate::clock::{Clock, SystemClock};
use crate::config::BettingConfig;
use crate::db::{LedgerStore, retry_transient};
use crate::locks::KeyedLocks;
use crate::money::Money;
use crate::wallet::{LedgerContext, LedgerReceipt, TransactionType, WalletManager};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const MAX_TITLE_LEN: usize = 200;

/// Statuses in which a bet is live and holding both stakes
const ACTIVE_STATUSES: [BetStatus; 4] = [
    BetStatus::Accepted,
    BetStatus::Active,
    BetStatus::Completed,
    BetStatus::Disputed,
];

/// Result of one expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Bets moved to `expired`
    pub expired: Vec<BetId>,
    /// Bets that could not be expired this round
    pub failed: usize,
}

fn movement_action(receipt: &LedgerReceipt) -> AuditAction {
    match receipt.transaction.transaction_type {
        TransactionType::BetPlaced => AuditAction::FundsLocked,
        TransactionType::Refund => AuditAction::FundsUnlocked,
        TransactionType::BetLost => AuditAction::FundsDebited,
        TransactionType::Fee => AuditAction::CommissionCollected,
        _ => AuditAction::FundsCredited,
    }
}

fn reversal_action(receipt: &LedgerReceipt) -> AuditAction {
    match receipt.transaction.transaction_type {
        TransactionType::BetPlaced => AuditAction::FundsUnlocked,
        TransactionType::Refund => AuditAction::FundsLocked,
        TransactionType::BetLost => AuditAction::FundsCredited,
        _ => AuditAction::FundsDebited,
    }
}

/// Bet lifecycle engine
pub struct BetEngine {
    store: Arc<dyn LedgerStore>,
    wallets: Arc<WalletManager>,
    audit: AuditLog,
    limits: LimitManager,
    config: BettingConfig,
    bet_locks: KeyedLocks<BetId>,
    clock: Arc<dyn Clock>,
}

impl BetEngine {
    /// Create a new bet engine
    pub fn new(
        store: Arc<dyn LedgerStore>,
        wallets: Arc<WalletManager>,
        config: BettingConfig,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            audit: AuditLog::new(store.clone(), clock.clone()),
            limits: LimitManager::new(store.clone(), config.limit_defaults.clone()),
            store,
            wallets,
            config,
            bet_locks: KeyedLocks::new(),
            clock,
        }
    }

    /// Replace the time source used for expiry, limit windows and audit timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.audit = AuditLog::new(self.store.clone(), clock.clone());
        self.clock = clock;
        self
    }

    pub fn wallets(&self) -> &WalletManager {
        &self.wallets
    }

    pub fn limits(&self) -> &LimitManager {
        &self.limits
    }

    pub fn config(&self) -> &BettingConfig {
        &self.config
    }

    /// Create a pending bet.
    ///
    /// No funds are locked until the bet is accepted; the creator's available balance is only
    /// checked here. The stake is counted against the creator's rolling limits.
    ///
    /// # Arguments
    ///
    /// * `request` - Creator, title, type, stake and optional named opponent and expiry
    ///
    /// # Returns
    ///
    /// The stored bet in `pending` status, with its id assigned
    ///
    /// # Errors
    ///
    /// - `Validation`: Bad title, stake outside the bet bounds, expiry out of range or a
    ///   limit window would be exceeded
    /// - `InsufficientFunds`: The creator cannot cover the stake
    /// - `Storage`: The bet could not be saved; the limit usage is released again
    pub async fn create_bet(&self, request: CreateBetRequest) -> BetResult<Bet> {
        let now = self.clock.now();
        let expiry_hours = self.validate_create(&request)?;

        let balance = self.wallets.get_balance(request.creator_id).await?;
        if balance.available < request.amount {
            return Err(BetError::InsufficientFunds(format!(
                "Available balance ${} is less than bet amount ${}",
                balance.available, request.amount
            )));
        }

        self.limits
            .check_and_record(request.creator_id, request.amount, now)
            .await?;

        let bet = self.new_bet(&request, now + Duration::hours(expiry_hours), now);
        let stored = match self.store.insert_bet(&bet).await {
            Ok(stored) => stored,
            Err(err) => {
                if let Err(release_err) = self
                    .limits
                    .release(request.creator_id, request.amount, now)
                    .await
                {
                    log::error!(
                        "Failed to release limits for user {} after bet insert failed: {release_err}",
                        request.creator_id
                    );
                }
                return Err(err.into());
            }
        };

        self.audit
            .record_or_log(
                stored.id,
                Some(request.creator_id),
                AuditAction::BetCreated,
                None,
                Some(bet_snapshot(&stored)),
                Some(stored.title.clone()),
            )
            .await;
        log::info!(
            "User {} created bet {} for ${} ({})",
            stored.created_by,
            stored.id,
            stored.amount,
            stored.bet_type
        );
        Ok(stored)
    }

    /// Accept a pending bet and lock both stakes.
    ///
    /// # Arguments
    ///
    /// * `bet_id` - Bet to accept
    /// * `acceptor_id` - User taking the open side
    ///
    /// # Errors
    ///
    /// - `Expired`: The bet passed its expiry before acceptance
    /// - `Security`: The bet is reserved for another user
    /// - `BusinessLogic`: The bet is no longer pending or the creator tried to accept it
    /// - `InsufficientFunds`: Either side cannot cover the stake
    /// - `Conflict`: Another instance changed the bet first; every lock made here is undone
    /// - `Storage`: A ledger or bet write failed; every lock made here is undone
    pub async fn accept_bet(&self, bet_id: BetId, acceptor_id: i64) -> BetResult<Bet> {
        let _guard = self.bet_locks.acquire(&bet_id).await;
        let now = self.clock.now();
        let bet = self.load_current(bet_id, now).await?;
        if bet.status == BetStatus::Expired {
            return Err(BetError::Expired(bet_id));
        }

        let mut updated = bet.clone();
        updated.accept(acceptor_id, now)?;

        self.limits
            .check_and_record(acceptor_id, bet.amount, now)
            .await?;

        let steps = [
            LedgerStep::Lock {
                user_id: bet.created_by,
                amount: bet.amount,
            },
            LedgerStep::Lock {
                user_id: acceptor_id,
                amount: bet.amount,
            },
        ];
        if let Err(err) = self
            .commit_with_funds(&bet, &updated, Some(acceptor_id), &steps, "Bet stake")
            .await
        {
            if let Err(release_err) = self.limits.release(acceptor_id, bet.amount, now).await {
                log::error!("Failed to release limits for user {acceptor_id}: {release_err}");
            }
            return Err(err);
        }

        self.audit
            .transition(
                &bet,
                &updated,
                Some(acceptor_id),
                AuditAction::BetAccepted,
                None,
            )
            .await;
        log::info!("User {acceptor_id} accepted bet {bet_id}");
        Ok(updated)
    }

    /// Mark an accepted bet as under way. Creator or acceptor only.
    pub async fn activate_bet(&self, bet_id: BetId, user_id: i64) -> BetResult<Bet> {
        self.simple_transition(bet_id, user_id, AuditAction::BetActivated, None, Bet::activate)
            .await
    }

    /// Mark an active bet as finished and waiting for an outcome. Creator or acceptor only.
    pub async fn complete_bet(&self, bet_id: BetId, user_id: i64) -> BetResult<Bet> {
        self.simple_transition(bet_id, user_id, AuditAction::BetCompleted, None, Bet::complete)
            .await
    }

    /// Contest a bet. Stakes stay locked until it is resolved or refunded.
    pub async fn dispute_bet(
        &self,
        bet_id: BetId,
        user_id: i64,
        reason: Option<String>,
    ) -> BetResult<Bet> {
        let bet = self
            .simple_transition(bet_id, user_id, AuditAction::BetDisputed, reason, Bet::dispute)
            .await?;
        log::warn!("User {user_id} disputed bet {bet_id}");
        Ok(bet)
    }

    /// Settle a bet with a final outcome and distribute the stakes.
    ///
    /// Legal once, from `accepted`, `active`, `completed` or `disputed`. A second call fails
    /// with [`BetError::AlreadyResolved`] and moves no money.
    ///
    /// # Errors
    ///
    /// - `Validation`: The outcome is `pending` or `disputed`
    /// - `AlreadyResolved`: The bet already has an outcome
    /// - `InvalidTransition`: The bet is still pending or was cancelled or expired
    /// - `Storage` / `Conflict`: Settlement did not complete; movements already made are
    ///   reversed and the bet keeps its previous status
    pub async fn resolve_bet(&self, request: ResolveBetRequest) -> BetResult<Bet> {
        if matches!(request.outcome, BetOutcome::Pending | BetOutcome::Disputed) {
            return Err(BetError::Validation(format!(
                "Invalid resolution outcome: {}",
                request.outcome
            )));
        }

        let bet_id = request.bet_id;
        let _guard = self.bet_locks.acquire(&bet_id).await;
        let now = self.clock.now();
        let bet = self.load_current(bet_id, now).await?;

        let mut updated = bet.clone();
        let plan = updated.resolve(
            request.outcome,
            request.method,
            request.data.clone(),
            request.resolved_by,
            now,
        )?;
        self.commit_with_funds(
            &bet,
            &updated,
            Some(request.resolved_by),
            &plan.steps,
            "Bet settlement",
        )
        .await?;

        let resolution = BetResolution {
            id: 0,
            bet_id,
            method: request.method,
            data: request.data,
            outcome: request.outcome,
            resolved_by: request.resolved_by,
            created_at: now,
        };
        if let Err(err) = self.store.insert_resolution(&resolution).await {
            log::error!("Failed to store resolution record for bet {bet_id}: {err}");
        }

        self.audit
            .transition(
                &bet,
                &updated,
                Some(request.resolved_by),
                AuditAction::BetResolved,
                Some(format!("{} resolution", request.method)),
            )
            .await;
        log::info!(
            "Bet {bet_id} resolved as {} by user {} (commission ${})",
            request.outcome,
            request.resolved_by,
            plan.commission
        );
        Ok(updated)
    }

    /// Close a disputed bet by returning both stakes.
    pub async fn refund_bet(
        &self,
        bet_id: BetId,
        actor_id: i64,
        reason: Option<String>,
    ) -> BetResult<Bet> {
        let _guard = self.bet_locks.acquire(&bet_id).await;
        let now = self.clock.now();
        let bet = self.load_current(bet_id, now).await?;

        let mut updated = bet.clone();
        let plan = updated.refund(actor_id, now)?;
        self.commit_with_funds(&bet, &updated, Some(actor_id), &plan.steps, "Bet refund")
            .await?;

        self.audit
            .transition(&bet, &updated, Some(actor_id), AuditAction::BetRefunded, reason)
            .await;
        log::info!("Bet {bet_id} refunded by user {actor_id}");
        Ok(updated)
    }

    /// Withdraw a pending or accepted bet. Creator only; accepted stakes are unlocked.
    pub async fn cancel_bet(
        &self,
        bet_id: BetId,
        user_id: i64,
        reason: Option<String>,
    ) -> BetResult<Bet> {
        let _guard = self.bet_locks.acquire(&bet_id).await;
        let now = self.clock.now();
        let bet = self.load_current(bet_id, now).await?;

        let mut updated = bet.clone();
        let plan = match updated.cancel(user_id, now) {
            Err(BetError::Security(msg)) => {
                log::warn!("SECURITY: user {user_id} attempted to cancel bet {bet_id}");
                return Err(BetError::Security(msg));
            }
            other => other?,
        };
        match plan {
            Some(plan) => {
                self.commit_with_funds(&bet, &updated, Some(user_id), &plan.steps, "Bet cancelled")
                    .await?
            }
            None => self.persist(&updated, bet.version).await?,
        }

        self.audit
            .transition(&bet, &updated, Some(user_id), AuditAction::BetCancelled, reason)
            .await;
        log::info!("User {user_id} cancelled bet {bet_id}");
        Ok(updated)
    }

    /// Move up to `limit` pending bets whose expiry is before `now` to `expired`.
    ///
    /// # Returns
    ///
    /// The ids that were expired and the number that could not be; one failing bet does not
    /// stop the rest of the batch.
    ///
    /// # Errors
    ///
    /// Only when the overdue bets cannot be listed
    pub async fn expire_pending_bets(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> BetResult<SweepReport> {
        let mut report = SweepReport::default();
        for bet_id in self.store.list_expired_pending(now, limit).await? {
            let _guard = self.bet_locks.acquire(&bet_id).await;
            let result = match self.load_bet(bet_id).await {
                Ok(bet) if bet.is_expired(now) => self.expire_locked(bet, now).await.map(Some),
                Ok(_) => Ok(None),
                Err(err) => Err(err),
            };
            match result {
                Ok(Some(bet)) if bet.status == BetStatus::Expired => report.expired.push(bet_id),
                Ok(_) => {}
                Err(err) => {
                    log::warn!("Failed to expire bet {bet_id}: {err}");
                    report.failed += 1;
                }
            }
        }
        if !report.expired.is_empty() {
            log::info!("Expired {} pending bets", report.expired.len());
        }
        Ok(report)
    }

    /// Load a bet, marking it expired first if its expiry has passed
    pub async fn get_bet(&self, bet_id: BetId) -> BetResult<Bet> {
        let bet = self.load_bet(bet_id).await?;
        self.refresh(bet).await
    }

    /// Bets the user created or takes part in, newest first
    pub async fn get_user_bets(&self, user_id: i64, query: BetQuery) -> BetResult<Vec<Bet>> {
        let bets = self
            .store
            .list_user_bets(user_id, query.status, query.limit, query.offset)
            .await?;
        let mut refreshed = Vec::with_capacity(bets.len());
        for bet in bets {
            refreshed.push(self.refresh(bet).await?);
        }
        Ok(refreshed)
    }

    /// Bets currently holding both stakes, newest first
    pub async fn get_active_bets(&self, limit: i64, offset: i64) -> BetResult<Vec<Bet>> {
        Ok(self
            .store
            .list_bets_by_status(&ACTIVE_STATUSES, limit, offset)
            .await?)
    }

    pub async fn get_statistics(&self, user_id: i64) -> BetResult<BetStatistics> {
        Ok(self.store.user_statistics(user_id).await?)
    }

    /// Audit rows of one bet, oldest first
    pub async fn get_audit_trail(&self, bet_id: BetId) -> BetResult<Vec<AuditEntry>> {
        Ok(self.audit.for_bet(bet_id).await?)
    }

    pub async fn get_resolution(&self, bet_id: BetId) -> BetResult<Option<BetResolution>> {
        Ok(self.store.find_resolution(bet_id).await?)
    }

    /// The user's current risk limits and usage
    pub async fn get_limits(&self, user_id: i64) -> BetResult<BetLimit> {
        self.limits.get_limits(user_id, self.clock.now()).await
    }

    fn validate_create(&self, request: &CreateBetRequest) -> BetResult<i64> {
        let title = request.title.trim();
        if title.is_empty() {
            return Err(BetError::Validation("Bet title is required".to_string()));
        }
        if title.chars().count() > MAX_TITLE_LEN {
            return Err(BetError::Validation(format!(
                "Bet title cannot exceed {MAX_TITLE_LEN} characters"
            )));
        }
        if request.amount < self.config.min_bet || request.amount > self.config.max_bet {
            return Err(BetError::Validation(format!(
                "Bet amount must be between ${} and ${}",
                self.config.min_bet, self.config.max_bet
            )));
        }
        if request.acceptor_id == Some(request.creator_id) {
            return Err(BetError::Validation(
                "Cannot create a bet against yourself".to_string(),
            ));
        }
        let hours = request
            .expires_in_hours
            .unwrap_or(self.config.default_expiry_hours);
        if hours < 1 || hours > self.config.max_expiry_hours {
            return Err(BetError::Validation(format!(
                "Bet expiry must be between 1 and {} hours",
                self.config.max_expiry_hours
            )));
        }
        Ok(hours)
    }

    fn new_bet(
        &self,
        request: &CreateBetRequest,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Bet {
        let rate = self.config.commission_rate;
        let terms = PayoutTerms::compute(request.amount, rate);
        let participant = |user_id, role, is_active| BetParticipant {
            id: 0,
            bet_id: 0,
            user_id,
            role,
            stake_amount: request.amount,
            potential_winnings: terms.winner_payout,
            actual_winnings: None,
            is_active,
            joined_at: now,
        };

        let mut participants = vec![participant(
            request.creator_id,
            ParticipantRole::Creator,
            true,
        )];
        if let Some(acceptor_id) = request.acceptor_id {
            participants.push(participant(acceptor_id, ParticipantRole::Acceptor, false));
        }

        Bet {
            id: 0,
            uuid: Uuid::new_v4(),
            title: request.title.trim().to_string(),
            description: request.description.clone(),
            bet_type: request.bet_type,
            status: BetStatus::Pending,
            outcome: BetOutcome::Pending,
            amount: request.amount,
            commission_rate: rate,
            commission_amount: terms.commission_amount,
            total_pot: terms.total_pot,
            winner_payout: terms.winner_payout,
            created_by: request.creator_id,
            updated_by: None,
            expires_at,
            accepted_at: None,
            resolved_at: None,
            resolution_method: None,
            resolution_data: None,
            version: 1,
            write_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
            participants,
        }
    }

    async fn load_bet(&self, bet_id: BetId) -> BetResult<Bet> {
        retry_transient("find_bet", || self.store.find_bet(bet_id))
            .await?
            .ok_or(BetError::BetNotFound(bet_id))
    }

    /// Load under the bet lock, applying lazy expiry
    async fn load_current(&self, bet_id: BetId, now: DateTime<Utc>) -> BetResult<Bet> {
        let bet = self.load_bet(bet_id).await?;
        if bet.is_expired(now) {
            return self.expire_locked(bet, now).await;
        }
        Ok(bet)
    }

    /// Return `bet`, or its expired form if its expiry has passed
    async fn refresh(&self, bet: Bet) -> BetResult<Bet> {
        let now = self.clock.now();
        if !bet.is_expired(now) {
            return Ok(bet);
        }
        let _guard = self.bet_locks.acquire(&bet.id).await;
        self.load_current(bet.id, now).await
    }

    async fn expire_locked(&self, bet: Bet, now: DateTime<Utc>) -> BetResult<Bet> {
        let mut updated = bet.clone();
        updated.expire(now)?;
        match self.persist(&updated, bet.version).await {
            Ok(()) => {}
            // Another instance got there first
            Err(BetError::Conflict(_)) => return self.load_bet(bet.id).await,
            Err(err) => return Err(err),
        }
        self.audit
            .transition(
                &bet,
                &updated,
                None,
                AuditAction::BetExpired,
                Some("Bet expired before acceptance".to_string()),
            )
            .await;
        log::info!("Bet {} expired", bet.id);
        Ok(updated)
    }

    async fn simple_transition<F>(
        &self,
        bet_id: BetId,
        user_id: i64,
        action: AuditAction,
        reason: Option<String>,
        apply: F,
    ) -> BetResult<Bet>
    where
        F: FnOnce(&mut Bet, i64, DateTime<Utc>) -> BetResult<()>,
    {
        let _guard = self.bet_locks.acquire(&bet_id).await;
        let now = self.clock.now();
        let bet = self.load_current(bet_id, now).await?;

        let mut updated = bet.clone();
        if let Err(err) = apply(&mut updated, user_id, now) {
            if matches!(err, BetError::Security(_)) {
                log::warn!("SECURITY: user {user_id} attempted {action} on bet {bet_id}");
            }
            return Err(err);
        }
        self.persist(&updated, bet.version).await?;

        self.audit
            .transition(&bet, &updated, Some(user_id), action, reason)
            .await;
        Ok(updated)
    }

    /// Write `bet` if the stored version is still `expected_version`.
    ///
    /// A transient failure is retried once. If the retry sees a version mismatch the first
    /// attempt may have committed, which only counts as success when the stored row carries
    /// this write's `write_id`. A rival that made the same transition has its own.
    async fn persist(&self, bet: &Bet, expected_version: i64) -> BetResult<()> {
        let written = match self.store.update_bet(bet, expected_version).await {
            Ok(written) => written,
            Err(err) if err.is_transient() => {
                log::warn!("Updating bet {} failed transiently, retrying once: {err}", bet.id);
                if self.store.update_bet(bet, expected_version).await? {
                    true
                } else {
                    self.load_bet(bet.id).await?.write_id == bet.write_id
                }
            }
            Err(err) => return Err(err.into()),
        };
        if written {
            Ok(())
        } else {
            log::warn!("Bet {} changed concurrently (expected version {expected_version})", bet.id);
            Err(BetError::Conflict(bet.id))
        }
    }

    /// Run `steps` through the ledger, then persist `updated`. Either everything lands or
    /// every movement already made is reversed.
    async fn commit_with_funds(
        &self,
        before: &Bet,
        updated: &Bet,
        actor: Option<i64>,
        steps: &[LedgerStep],
        reason: &str,
    ) -> BetResult<()> {
        let mut applied = Vec::with_capacity(steps.len());
        for step in steps {
            match self.execute_step(before.id, *step, reason).await {
                Ok(receipt) => applied.push(receipt),
                Err(err) => {
                    self.compensate(before.id, actor, applied, &err).await;
                    return Err(err);
                }
            }
        }
        if let Err(err) = self.persist(updated, before.version).await {
            self.compensate(before.id, actor, applied, &err).await;
            return Err(err);
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        bet_id: BetId,
        step: LedgerStep,
        reason: &str,
    ) -> BetResult<LedgerReceipt> {
        let ctx = LedgerContext::for_bet(bet_id, reason);
        let receipt = match step {
            LedgerStep::Lock { user_id, amount } => {
                self.wallets.lock_funds(user_id, amount, &ctx).await?
            }
            LedgerStep::Unlock { user_id, amount } => {
                self.wallets.unlock_funds(user_id, amount, &ctx).await?
            }
            LedgerStep::DebitLoss { user_id, amount } => {
                self.wallets.debit_loss(user_id, amount, &ctx).await?
            }
            LedgerStep::CreditWin { user_id, amount } => {
                self.wallets.credit_win(user_id, amount, &ctx).await?
            }
            LedgerStep::Commission { amount } => {
                self.wallets.collect_commission(amount, &ctx).await?
            }
        };
        self.audit
            .movement(bet_id, movement_action(&receipt), &receipt)
            .await;
        Ok(receipt)
    }

    /// Reverse `applied` newest first, then record the failed operation.
    async fn compensate(
        &self,
        bet_id: BetId,
        actor: Option<i64>,
        applied: Vec<LedgerReceipt>,
        cause: &BetError,
    ) {
        let reason = format!("Compensating failed operation on bet {bet_id}: {cause}");
        for receipt in applied.iter().rev() {
            let transaction = &receipt.transaction;
            match self.wallets.reverse(receipt, &reason).await {
                Ok(wallet) => {
                    self.audit
                        .record_or_log(
                            bet_id,
                            Some(transaction.user_id),
                            reversal_action(receipt),
                            None,
                            Some(json!({
                                "reversed_transaction_id": transaction.id,
                                "amount": transaction.amount,
                                "available_balance": wallet.available_balance,
                                "locked_balance": wallet.locked_balance,
                            })),
                            Some(reason.clone()),
                        )
                        .await;
                }
                Err(err) => {
                    log::error!(
                        "Failed to reverse {} transaction {} of user {} for bet {bet_id}: {err}",
                        transaction.transaction_type,
                        transaction.id,
                        transaction.user_id
                    );
                    self.audit
                        .record_or_log(
                            bet_id,
                            Some(transaction.user_id),
                            AuditAction::CompensationFailed,
                            None,
                            Some(json!({
                                "transaction_id": transaction.id,
                                "transaction_type": transaction.transaction_type,
                                "amount": transaction.amount,
                                "error": err.to_string(),
                            })),
                            Some(reason.clone()),
                        )
                        .await;
                }
            }
        }
        let moved: Money = applied.iter().map(|r| r.transaction.amount).sum();
        self.audit
            .record_or_log(
                bet_id,
                actor,
                AuditAction::OperationFailed,
                None,
                Some(json!({ "reversed_movements": applied.len(), "reversed_amount": moved })),
                Some(cause.to_string()),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::betting::models::BetType;
    use crate::clock::ManualClock;
    use crate::config::LedgerConfig;
    use crate::db::MemoryRepository;

    struct Harness {
        engine: BetEngine,
        clock: Arc<ManualClock>,
    }

    async fn harness() -> Harness {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryRepository::new());
        let clock = Arc::new(ManualClock::default());
        let wallets = Arc::new(
            WalletManager::new(store.clone(), LedgerConfig::default()).with_clock(clock.clone()),
        );
        let engine =
            BetEngine::new(store, wallets, BettingConfig::default()).with_clock(clock.clone());
        for user in [1, 2, 3] {
            engine
                .wallets()
                .add_funds(
                    user,
                    TransactionType::Deposit,
                    Money::from_units(500),
                    &LedgerContext::new("test deposit"),
                )
                .await
                .unwrap();
        }
        Harness { engine, clock }
    }

    fn request(amount: i64) -> CreateBetRequest {
        CreateBetRequest::new(1, "Next shot goes in", BetType::TrickShot, Money::from_units(amount))
    }

    #[tokio::test]
    async fn test_create_validation() {
        let h = harness().await;
        let mut blank = request(10);
        blank.title = "   ".to_string();
        assert!(matches!(
            h.engine.create_bet(blank).await,
            Err(BetError::Validation(_))
        ));
        assert!(matches!(
            h.engine.create_bet(request(20_000)).await,
            Err(BetError::Validation(_))
        ));
        assert!(matches!(
            h.engine.create_bet(request(10).with_acceptor(1)).await,
            Err(BetError::Validation(_))
        ));
        assert!(matches!(
            h.engine.create_bet(request(10).expires_in_hours(0)).await,
            Err(BetError::Validation(_))
        ));
        // Within bounds but more than the creator holds
        assert!(matches!(
            h.engine.create_bet(request(600)).await,
            Err(BetError::InsufficientFunds(_))
        ));
    }

    #[tokio::test]
    async fn test_create_sets_terms_and_records_limits() {
        let h = harness().await;
        let bet = h.engine.create_bet(request(100)).await.unwrap();
        assert_eq!(bet.status, BetStatus::Pending);
        assert_eq!(bet.commission_amount, Money::from_units(5));
        assert_eq!(bet.total_pot, Money::from_units(105));
        assert_eq!(bet.winner_payout, Money::from_units(195));
        assert_eq!(bet.version, 1);

        // Nothing locked at creation
        let balance = h.engine.wallets().get_balance(1).await.unwrap();
        assert_eq!(balance.locked, Money::ZERO);

        let limits = h.engine.get_limits(1).await.unwrap();
        assert_eq!(limits.daily.amount, Money::from_units(100));
        assert_eq!(limits.daily.count, 1);

        let trail = h.engine.get_audit_trail(bet.id).await.unwrap();
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, AuditAction::BetCreated);
    }

    #[tokio::test]
    async fn test_accept_locks_both_stakes() {
        let h = harness().await;
        let bet = h.engine.create_bet(request(100)).await.unwrap();
        let accepted = h.engine.accept_bet(bet.id, 2).await.unwrap();
        assert_eq!(accepted.status, BetStatus::Accepted);
        assert_eq!(accepted.version, 2);

        for user in [1, 2] {
            let balance = h.engine.wallets().get_balance(user).await.unwrap();
            assert_eq!(balance.available, Money::from_units(400));
            assert_eq!(balance.locked, Money::from_units(100));
        }

        let actions: Vec<AuditAction> = h
            .engine
            .get_audit_trail(bet.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert_eq!(
            actions,
            vec![
                AuditAction::BetCreated,
                AuditAction::FundsLocked,
                AuditAction::FundsLocked,
                AuditAction::BetAccepted,
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_second_lock_unwinds_first() {
        let h = harness().await;
        let bet = h.engine.create_bet(request(100)).await.unwrap();
        // Acceptor 4 has no wallet funds
        let err = h.engine.accept_bet(bet.id, 4).await.unwrap_err();
        assert!(matches!(err, BetError::InsufficientFunds(_)), "{err}");

        let creator = h.engine.wallets().get_balance(1).await.unwrap();
        assert_eq!(creator.available, Money::from_units(500));
        assert_eq!(creator.locked, Money::ZERO);

        let stored = h.engine.get_bet(bet.id).await.unwrap();
        assert_eq!(stored.status, BetStatus::Pending);
        assert_eq!(stored.version, 1);

        let actions: Vec<AuditAction> = h
            .engine
            .get_audit_trail(bet.id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.action)
            .collect();
        assert!(actions.contains(&AuditAction::FundsUnlocked));
        assert_eq!(actions.last(), Some(&AuditAction::OperationFailed));

        let acceptor_limits = h.engine.get_limits(4).await.unwrap();
        assert_eq!(acceptor_limits.daily.count, 0);
    }

    #[tokio::test]
    async fn test_lazy_expiry_on_read_and_accept() {
        let h = harness().await;
        let bet = h
            .engine
            .create_bet(request(10).expires_in_hours(1))
            .await
            .unwrap();
        h.clock.advance(Duration::hours(2));

        let err = h.engine.accept_bet(bet.id, 2).await.unwrap_err();
        assert!(matches!(err, BetError::Expired(_)));
        assert_eq!(err.to_string(), "Bet has expired");

        let stored = h.engine.get_bet(bet.id).await.unwrap();
        assert_eq!(stored.status, BetStatus::Expired);
        assert_eq!(
            h.engine.wallets().get_balance(2).await.unwrap().locked,
            Money::ZERO
        );
    }

    #[tokio::test]
    async fn test_sweep_expires_only_due_bets() {
        let h = harness().await;
        let short = h
            .engine
            .create_bet(request(10).expires_in_hours(1))
            .await
            .unwrap();
        let long = h
            .engine
            .create_bet(request(10).expires_in_hours(48))
            .await
            .unwrap();

        let now = h.clock.now() + Duration::hours(3);
        let report = h.engine.expire_pending_bets(now, 100).await.unwrap();
        assert_eq!(report.expired, vec![short.id]);
        assert_eq!(report.failed, 0);
        assert_eq!(
            h.engine.get_bet(long.id).await.unwrap().status,
            BetStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_only_parties_drive_transitions() {
        let h = harness().await;
        let bet = h.engine.create_bet(request(10)).await.unwrap();
        h.engine.accept_bet(bet.id, 2).await.unwrap();

        assert!(matches!(
            h.engine.activate_bet(bet.id, 3).await,
            Err(BetError::Security(_))
        ));
        h.engine.activate_bet(bet.id, 1).await.unwrap();
        h.engine.complete_bet(bet.id, 2).await.unwrap();
        let disputed = h
            .engine
            .dispute_bet(bet.id, 2, Some("ball was out".to_string()))
            .await
            .unwrap();
        assert_eq!(disputed.status, BetStatus::Disputed);
        assert_eq!(disputed.version, 5);
        assert_eq!(disputed.outcome, BetOutcome::Pending);
    }

    #[tokio::test]
    async fn test_cancel_by_non_creator_is_security_error() {
        let h = harness().await;
        let bet = h.engine.create_bet(request(10)).await.unwrap();
        assert!(matches!(
            h.engine.cancel_bet(bet.id, 2, None).await,
            Err(BetError::Security(_))
        ));
        let cancelled = h.engine.cancel_bet(bet.id, 1, None).await.unwrap();
        assert_eq!(cancelled.status, BetStatus::Cancelled);
        assert_eq!(cancelled.outcome, BetOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_resolve_rejects_non_final_outcome() {
        let h = harness().await;
        let bet = h.engine.create_bet(request(10)).await.unwrap();
        h.engine.accept_bet(bet.id, 2).await.unwrap();
        let err = h
            .engine
            .resolve_bet(ResolveBetRequest::manual(bet.id, BetOutcome::Pending, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, BetError::Validation(_)));
    }

    #[tokio::test]
    async fn test_missing_bet() {
        let h = harness().await;
        assert!(matches!(
            h.engine.get_bet(999).await,
            Err(BetError::BetNotFound(999))
        ));
    }
}
