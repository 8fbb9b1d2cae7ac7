//! Ledger and betting configuration.
//!
//! Every knob can be overridden from the environment; anything unset or unparsable
//! falls back to the defaults below.

use crate::money::{CommissionRate, Money};
use std::str::FromStr;

/// Wallet ledger settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Largest single movement accepted by the ledger
    pub max_transaction: Money,
    /// User id of the platform wallet that receives commission
    pub house_user_id: i64,
    /// Cap on completed deposits per UTC day
    pub daily_deposit_limit: Money,
    /// Cap on requested withdrawals per UTC day
    pub daily_withdrawal_limit: Money,
}

impl LedgerConfig {
    /// Load from environment variables
    ///
    /// - `LEDGER_MAX_TRANSACTION` (default: 1000000.00)
    /// - `HOUSE_USER_ID` (default: 0)
    /// - `DAILY_DEPOSIT_LIMIT` (default: 1000.00)
    /// - `DAILY_WITHDRAWAL_LIMIT` (default: 5000.00)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_transaction: parse_env_or("LEDGER_MAX_TRANSACTION", defaults.max_transaction),
            house_user_id: parse_env_or("HOUSE_USER_ID", defaults.house_user_id),
            daily_deposit_limit: parse_env_or("DAILY_DEPOSIT_LIMIT", defaults.daily_deposit_limit),
            daily_withdrawal_limit: parse_env_or(
                "DAILY_WITHDRAWAL_LIMIT",
                defaults.daily_withdrawal_limit,
            ),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_transaction: Money::from_units(1_000_000),
            house_user_id: 0,
            daily_deposit_limit: Money::from_units(1_000),
            daily_withdrawal_limit: Money::from_units(5_000),
        }
    }
}

/// Bet lifecycle settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BettingConfig {
    pub commission_rate: CommissionRate,
    /// System-wide lower bound on a stake
    pub min_bet: Money,
    /// System-wide upper bound on a stake
    pub max_bet: Money,
    pub default_expiry_hours: i64,
    /// Longest expiry a creator may request
    pub max_expiry_hours: i64,
    /// Per-user limits applied when a user first bets
    pub limit_defaults: LimitDefaults,
}

impl BettingConfig {
    /// Load from environment variables
    ///
    /// - `COMMISSION_RATE` (default: 0.05)
    /// - `MIN_BET` / `MAX_BET` (default: 1.00 / 10000.00)
    /// - `BET_EXPIRY_HOURS` (default: 24), `BET_MAX_EXPIRY_HOURS` (default: 720)
    /// - `LIMIT_*`, see [`LimitDefaults::from_env`]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            commission_rate: parse_env_or("COMMISSION_RATE", defaults.commission_rate),
            min_bet: parse_env_or("MIN_BET", defaults.min_bet),
            max_bet: parse_env_or("MAX_BET", defaults.max_bet),
            default_expiry_hours: parse_env_or("BET_EXPIRY_HOURS", defaults.default_expiry_hours),
            max_expiry_hours: parse_env_or("BET_MAX_EXPIRY_HOURS", defaults.max_expiry_hours),
            limit_defaults: LimitDefaults::from_env(),
        }
    }
}

impl Default for BettingConfig {
    fn default() -> Self {
        Self {
            commission_rate: CommissionRate::default(),
            min_bet: Money::from_units(1),
            max_bet: Money::from_units(10_000),
            default_expiry_hours: 24,
            max_expiry_hours: 24 * 30,
            limit_defaults: LimitDefaults::default(),
        }
    }
}

/// Risk limits given to a user with no stored limit row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitDefaults {
    pub min_single_bet: Money,
    pub max_single_bet: Money,
    pub daily_amount: Money,
    pub weekly_amount: Money,
    pub monthly_amount: Money,
    pub daily_count: i32,
    pub weekly_count: i32,
    pub monthly_count: i32,
}

impl LimitDefaults {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            min_single_bet: parse_env_or("LIMIT_MIN_SINGLE_BET", defaults.min_single_bet),
            max_single_bet: parse_env_or("LIMIT_MAX_SINGLE_BET", defaults.max_single_bet),
            daily_amount: parse_env_or("LIMIT_DAILY_AMOUNT", defaults.daily_amount),
            weekly_amount: parse_env_or("LIMIT_WEEKLY_AMOUNT", defaults.weekly_amount),
            monthly_amount: parse_env_or("LIMIT_MONTHLY_AMOUNT", defaults.monthly_amount),
            daily_count: parse_env_or("LIMIT_DAILY_COUNT", defaults.daily_count),
            weekly_count: parse_env_or("LIMIT_WEEKLY_COUNT", defaults.weekly_count),
            monthly_count: parse_env_or("LIMIT_MONTHLY_COUNT", defaults.monthly_count),
        }
    }
}

impl Default for LimitDefaults {
    fn default() -> Self {
        Self {
            min_single_bet: Money::from_units(1),
            max_single_bet: Money::from_units(10_000),
            daily_amount: Money::from_units(1_000),
            weekly_amount: Money::from_units(5_000),
            monthly_amount: Money::from_units(20_000),
            daily_count: 50,
            weekly_count: 200,
            monthly_count: 500,
        }
    }
}

/// Parse an environment variable, falling back to `default`
pub(crate) fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
