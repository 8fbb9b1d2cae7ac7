//! Periodic sweep that moves overdue pending bets to `expired`.
//!
//! Reads already expire bets lazily; the sweep keeps stale offers from lingering in
//! listings and statistics when nobody looks at them.

use crate::config::SweepConfig;
use crate::{logging, metrics};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use wager_ledger::betting::{BetEngine, SweepReport};
use wager_ledger::db::Database;

pub struct Sweeper {
    engine: Arc<BetEngine>,
    config: SweepConfig,
}

impl Sweeper {
    pub fn new(engine: Arc<BetEngine>, config: SweepConfig) -> Self {
        Self { engine, config }
    }

    /// Expire every bet overdue at `now`, one batch at a time
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let started = Instant::now();
        let mut total = SweepReport::default();

        loop {
            match self
                .engine
                .expire_pending_bets(now, self.config.batch_size)
                .await
            {
                Ok(report) => {
                    let seen = (report.expired.len() + report.failed) as i64;
                    let progressed = !report.expired.is_empty();
                    total.failed += report.failed;
                    total.expired.extend(report.expired);
                    // A short batch means nothing else is overdue; an unproductive full
                    // batch would only return the same failing bets again
                    if seen < self.config.batch_size || !progressed {
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Expiry sweep failed: {}", e);
                    total.failed += 1;
                    break;
                }
            }
        }

        let elapsed = started.elapsed();
        metrics::bets_expired_total(total.expired.len());
        metrics::sweep_errors_total(total.failed);
        metrics::sweep_duration_ms(elapsed.as_secs_f64() * 1000.0);
        logging::log_sweep(elapsed.as_millis() as u64, total.expired.len(), total.failed);
        if !total.expired.is_empty() {
            tracing::info!("Swept {} expired bet(s)", total.expired.len());
        }
        total
    }

    /// Sweep on every interval tick until `shutdown` flips.
    ///
    /// When a database is given its health is checked first; an unhealthy tick is skipped.
    pub async fn run(self, db: Option<Database>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(
            "Expiry sweep running every {}s (batch size {})",
            self.config.interval_secs,
            self.config.batch_size
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Some(db) = &db {
                match db.health_check().await {
                    Ok(()) => metrics::database_healthy(true),
                    Err(e) => {
                        metrics::database_healthy(false);
                        metrics::sweep_errors_total(1);
                        tracing::warn!("Database unhealthy, skipping sweep: {}", e);
                        continue;
                    }
                }
            }

            self.sweep(Utc::now()).await;
        }

        tracing::info!("Expiry sweep stopped");
    }
}
