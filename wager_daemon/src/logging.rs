//! Structured logging setup.
//!
//! The ledger logs through the `log` facade; the subscriber installed here also
//! receives those records.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Sweeps slower than this are logged at warn level
const SLOW_SWEEP_MS: u64 = 1000;

/// Initialize structured logging
///
/// Log levels are configurable via the `RUST_LOG` env var.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log how long one sweep took
pub fn log_sweep(duration_ms: u64, expired: usize, failed: usize) {
    if duration_ms > SLOW_SWEEP_MS {
        tracing::warn!(
            duration_ms = duration_ms,
            expired = expired,
            failed = failed,
            "PERFORMANCE: Slow expiry sweep"
        );
    } else {
        tracing::debug!(
            duration_ms = duration_ms,
            expired = expired,
            failed = failed,
            "Expiry sweep finished"
        );
    }
}
