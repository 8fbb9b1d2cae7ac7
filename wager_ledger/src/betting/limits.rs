//! Per-user rolling risk limits.
//!
//! Each user has a daily, weekly and monthly window. A window whose reset time has
//! passed is zeroed and re-anchored at the start of the current UTC day before the
//! new bet is checked against it.

use super::errors::{BetError, BetResult};
use crate::config::LimitDefaults;
use crate::db::LedgerStore;
use crate::locks::KeyedLocks;
use crate::money::Money;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which rolling window a limit belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LimitWindow {
    Daily,
    Weekly,
    Monthly,
}

impl LimitWindow {
    pub fn length(self) -> Duration {
        match self {
            LimitWindow::Daily => Duration::days(1),
            LimitWindow::Weekly => Duration::weeks(1),
            LimitWindow::Monthly => Duration::days(30),
        }
    }

    /// `reset_at = window_start + window_length`, where the window starts at UTC midnight.
    pub fn next_reset(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);
        midnight + self.length()
    }
}

impl std::fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LimitWindow::Daily => write!(f, "daily"),
            LimitWindow::Weekly => write!(f, "weekly"),
            LimitWindow::Monthly => write!(f, "monthly"),
        }
    }
}

/// Usage and cap for one window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowUsage {
    pub amount_limit: Money,
    pub count_limit: i32,
    pub amount: Money,
    pub count: i32,
    pub reset_at: DateTime<Utc>,
}

impl WindowUsage {
    fn fresh(window: LimitWindow, amount_limit: Money, count_limit: i32, now: DateTime<Utc>) -> Self {
        Self {
            amount_limit,
            count_limit,
            amount: Money::ZERO,
            count: 0,
            reset_at: window.next_reset(now),
        }
    }

    fn roll(&mut self, window: LimitWindow, now: DateTime<Utc>) -> bool {
        if now < self.reset_at {
            return false;
        }
        self.amount = Money::ZERO;
        self.count = 0;
        self.reset_at = window.next_reset(now);
        true
    }
}

/// Per-user risk configuration and counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetLimit {
    pub user_id: i64,
    pub min_single_bet: Money,
    pub max_single_bet: Money,
    pub daily: WindowUsage,
    pub weekly: WindowUsage,
    pub monthly: WindowUsage,
    pub updated_at: DateTime<Utc>,
}

impl BetLimit {
    pub fn with_defaults(user_id: i64, defaults: &LimitDefaults, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            min_single_bet: defaults.min_single_bet,
            max_single_bet: defaults.max_single_bet,
            daily: WindowUsage::fresh(
                LimitWindow::Daily,
                defaults.daily_amount,
                defaults.daily_count,
                now,
            ),
            weekly: WindowUsage::fresh(
                LimitWindow::Weekly,
                defaults.weekly_amount,
                defaults.weekly_count,
                now,
            ),
            monthly: WindowUsage::fresh(
                LimitWindow::Monthly,
                defaults.monthly_amount,
                defaults.monthly_count,
                now,
            ),
            updated_at: now,
        }
    }

    fn windows_mut(&mut self) -> [(LimitWindow, &mut WindowUsage); 3] {
        [
            (LimitWindow::Daily, &mut self.daily),
            (LimitWindow::Weekly, &mut self.weekly),
            (LimitWindow::Monthly, &mut self.monthly),
        ]
    }

    /// Zero every window whose reset time has passed. Returns true if any window rolled.
    pub fn roll_windows(&mut self, now: DateTime<Utc>) -> bool {
        let mut rolled = false;
        for (window, usage) in self.windows_mut() {
            rolled |= usage.roll(window, now);
        }
        rolled
    }

    /// Validate `amount` against the single-bet bounds and every window.
    pub fn check(&self, amount: Money) -> BetResult<()> {
        if amount > self.max_single_bet {
            return Err(BetError::Validation(format!(
                "Bet amount exceeds maximum single bet limit of ${}",
                self.max_single_bet
            )));
        }
        if amount < self.min_single_bet {
            return Err(BetError::Validation(format!(
                "Bet amount below minimum single bet limit of ${}",
                self.min_single_bet
            )));
        }
        for (window, usage) in [
            (LimitWindow::Daily, &self.daily),
            (LimitWindow::Weekly, &self.weekly),
            (LimitWindow::Monthly, &self.monthly),
        ] {
            let projected = usage
                .amount
                .checked_add(amount)
                .ok_or_else(|| BetError::Validation("Bet amount overflow".to_string()))?;
            if projected > usage.amount_limit {
                return Err(BetError::Validation(format!(
                    "Bet would exceed {window} betting limit of ${}",
                    usage.amount_limit
                )));
            }
            if usage.count >= usage.count_limit {
                return Err(BetError::Validation(format!(
                    "Bet would exceed {window} bet count limit of {}",
                    usage.count_limit
                )));
            }
        }
        Ok(())
    }

    /// Count a bet against every window. Call only after [`BetLimit::check`] passed.
    pub fn record(&mut self, amount: Money, now: DateTime<Utc>) {
        for (_, usage) in self.windows_mut() {
            usage.amount += amount;
            usage.count += 1;
        }
        self.updated_at = now;
    }

    /// Undo a [`BetLimit::record`] for a bet that never came into existence.
    pub fn release(&mut self, amount: Money, now: DateTime<Utc>) {
        for (_, usage) in self.windows_mut() {
            usage.amount = (usage.amount - amount).max(Money::ZERO);
            usage.count = (usage.count - 1).max(0);
        }
        self.updated_at = now;
    }
}

/// Loads, checks and persists [`BetLimit`] rows, one user at a time.
pub struct LimitManager {
    store: Arc<dyn LedgerStore>,
    defaults: LimitDefaults,
    user_locks: KeyedLocks<i64>,
}

impl LimitManager {
    pub fn new(store: Arc<dyn LedgerStore>, defaults: LimitDefaults) -> Self {
        Self {
            store,
            defaults,
            user_locks: KeyedLocks::new(),
        }
    }

    /// Current limits for a user, with elapsed windows already rolled
    pub async fn get_limits(&self, user_id: i64, now: DateTime<Utc>) -> BetResult<BetLimit> {
        let mut limit = match self.store.find_limit(user_id).await? {
            Some(limit) => limit,
            None => BetLimit::with_defaults(user_id, &self.defaults, now),
        };
        limit.roll_windows(now);
        Ok(limit)
    }

    /// Check `amount` and, if allowed, count it in every window.
    pub async fn check_and_record(
        &self,
        user_id: i64,
        amount: Money,
        now: DateTime<Utc>,
    ) -> BetResult<BetLimit> {
        let _guard = self.user_locks.acquire(&user_id).await;
        let mut limit = self.get_limits(user_id, now).await?;
        limit.check(amount)?;
        limit.record(amount, now);
        self.store.save_limit(&limit).await?;
        Ok(limit)
    }

    /// Check without recording
    pub async fn check(&self, user_id: i64, amount: Money, now: DateTime<Utc>) -> BetResult<()> {
        self.get_limits(user_id, now).await?.check(amount)
    }

    /// Return a previously recorded amount to the user's windows.
    pub async fn release(&self, user_id: i64, amount: Money, now: DateTime<Utc>) -> BetResult<()> {
        let _guard = self.user_locks.acquire(&user_id).await;
        let mut limit = self.get_limits(user_id, now).await?;
        limit.release(amount, now);
        self.store.save_limit(&limit).await?;
        Ok(())
    }

    /// Replace a user's caps, keeping current usage
    pub async fn set_limits(
        &self,
        user_id: i64,
        limits: LimitDefaults,
        now: DateTime<Utc>,
    ) -> BetResult<BetLimit> {
        if limits.min_single_bet > limits.max_single_bet {
            return Err(BetError::Validation(
                "Minimum single bet cannot exceed maximum".to_string(),
            ));
        }
        let _guard = self.user_locks.acquire(&user_id).await;
        let mut limit = self.get_limits(user_id, now).await?;
        limit.min_single_bet = limits.min_single_bet;
        limit.max_single_bet = limits.max_single_bet;
        limit.daily.amount_limit = limits.daily_amount;
        limit.daily.count_limit = limits.daily_count;
        limit.weekly.amount_limit = limits.weekly_amount;
        limit.weekly.count_limit = limits.weekly_count;
        limit.monthly.amount_limit = limits.monthly_amount;
        limit.monthly.count_limit = limits.monthly_count;
        limit.updated_at = now;
        self.store.save_limit(&limit).await?;
        Ok(limit)
    }
}
