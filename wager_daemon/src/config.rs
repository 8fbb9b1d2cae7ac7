//! Daemon configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use std::net::SocketAddr;
use wager_ledger::config::{BettingConfig, LedgerConfig};
use wager_ledger::db::DatabaseConfig;

/// Complete daemon configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Wallet ledger settings
    pub ledger: LedgerConfig,
    /// Bet lifecycle settings
    pub betting: BettingConfig,
    /// Sweep scheduling
    pub sweep: SweepConfig,
    /// Prometheus scrape address, `None` disables the exporter
    pub metrics_bind: Option<SocketAddr>,
    /// Apply embedded migrations before starting
    pub run_migrations: bool,
}

/// Expired-bet sweep settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// Seconds between sweeps
    pub interval_secs: u64,
    /// Bets expired per storage round trip
    pub batch_size: i64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_size: 100,
        }
    }
}

/// Values given on the command line; they win over the environment
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub database_url: Option<String>,
    pub metrics_bind: Option<SocketAddr>,
    pub sweep_interval_secs: Option<u64>,
    pub skip_migrations: bool,
}

impl DaemonConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns error if `METRICS_BIND` is set but is not a socket address
    pub fn from_env(overrides: CliOverrides) -> Result<Self, ConfigError> {
        let mut database = DatabaseConfig::from_env();
        if let Some(url) = overrides.database_url {
            database.database_url = url;
        }

        let metrics_bind = match overrides.metrics_bind {
            Some(addr) => Some(addr),
            None => match std::env::var("METRICS_BIND") {
                Ok(value) if value.is_empty() => None,
                Ok(value) => Some(value.parse().map_err(|_| ConfigError::Invalid {
                    var: "METRICS_BIND".to_string(),
                    reason: format!("'{value}' is not an IP:PORT address"),
                })?),
                Err(_) => None,
            },
        };

        let defaults = SweepConfig::default();
        let sweep = SweepConfig {
            interval_secs: overrides
                .sweep_interval_secs
                .unwrap_or_else(|| parse_env_or("SWEEP_INTERVAL_SECS", defaults.interval_secs)),
            batch_size: parse_env_or("SWEEP_BATCH_SIZE", defaults.batch_size),
        };

        let run_migrations = !overrides.skip_migrations && parse_env_or("RUN_MIGRATIONS", true);

        Ok(DaemonConfig {
            database,
            ledger: LedgerConfig::from_env(),
            betting: BettingConfig::from_env(),
            sweep,
            metrics_bind,
            run_migrations,
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep.interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "SWEEP_INTERVAL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.sweep.batch_size <= 0 {
            return Err(ConfigError::Invalid {
                var: "SWEEP_BATCH_SIZE".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed max connections ({})",
                    self.database.max_connections
                ),
            });
        }

        if !self.betting.min_bet.is_positive() {
            return Err(ConfigError::Invalid {
                var: "MIN_BET".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.betting.max_bet < self.betting.min_bet {
            return Err(ConfigError::Invalid {
                var: "MAX_BET".to_string(),
                reason: format!("Must be at least the minimum bet ({})", self.betting.min_bet),
            });
        }

        if self.betting.default_expiry_hours < 1
            || self.betting.default_expiry_hours > self.betting.max_expiry_hours
        {
            return Err(ConfigError::Invalid {
                var: "BET_EXPIRY_HOURS".to_string(),
                reason: format!(
                    "Must be between 1 and the maximum expiry ({} hours)",
                    self.betting.max_expiry_hours
                ),
            });
        }

        if !self.ledger.daily_deposit_limit.is_positive()
            || !self.ledger.daily_withdrawal_limit.is_positive()
        {
            return Err(ConfigError::Invalid {
                var: "DAILY_DEPOSIT_LIMIT / DAILY_WITHDRAWAL_LIMIT".to_string(),
                reason: "Daily caps must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
