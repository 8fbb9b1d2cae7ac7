//! Background process for the wager ledger.
//!
//! Owns the database pool, applies migrations, runs the periodic expired-bet sweep and
//! exports Prometheus metrics until interrupted.

mod config;
mod logging;
mod metrics;
mod sweeper;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error};
use ctrlc::set_handler;
use pico_args::Arguments;
use tokio::sync::watch;
use wager_ledger::{BetEngine, WalletManager, db::Database};

use crate::config::{CliOverrides, DaemonConfig};
use crate::sweeper::Sweeper;

const HELP: &str = "\
Run the wager ledger background daemon

USAGE:
  wager_daemon [OPTIONS]

OPTIONS:
  --db-url          URL        Database connection string  [default: env DATABASE_URL]
  --metrics-bind    IP:PORT    Prometheus scrape address   [default: env METRICS_BIND, disabled if unset]
  --sweep-interval  SECS       Seconds between expiry sweeps  [default: env SWEEP_INTERVAL_SECS or 60]

FLAGS:
  --once                       Run a single sweep and exit
  --skip-migrations            Do not apply embedded migrations on startup
  -h, --help                   Print help information

ENVIRONMENT:
  DATABASE_URL                 PostgreSQL connection string
  RUST_LOG                     Log filter (default: info,sqlx=warn)
  SWEEP_BATCH_SIZE             Bets expired per round trip (default: 100)
  COMMISSION_RATE, MIN_BET, MAX_BET, BET_EXPIRY_HOURS, LIMIT_*, DAILY_*_LIMIT, HOUSE_USER_ID
  Variables may also be placed in a .env file in the working directory
";

struct Args {
    overrides: CliOverrides,
    once: bool,
}

fn parse_args() -> Result<Args, Error> {
    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        once: pargs.contains("--once"),
        overrides: CliOverrides {
            skip_migrations: pargs.contains("--skip-migrations"),
            database_url: pargs.opt_value_from_str("--db-url")?,
            metrics_bind: pargs.opt_value_from_str::<_, SocketAddr>("--metrics-bind")?,
            sweep_interval_secs: pargs.opt_value_from_str("--sweep-interval")?,
        },
    };

    let rest = pargs.finish();
    if !rest.is_empty() {
        anyhow::bail!("Unexpected arguments: {:?}", rest);
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let args = parse_args()?;
    logging::init();

    let config = DaemonConfig::from_env(args.overrides)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(|e| anyhow::anyhow!(e))?;
        tracing::info!("Metrics available at http://{}/metrics", addr);
    }

    tracing::info!("Connecting to database");
    let db = Database::new(&config.database)
        .await
        .context("Failed to connect to database")?;
    metrics::database_healthy(true);
    tracing::info!("Database connected successfully");

    if config.run_migrations {
        db.migrate().await.context("Failed to apply migrations")?;
        tracing::info!("Migrations applied");
    }

    let store = Arc::new(db.repository());
    let wallets = Arc::new(WalletManager::new(store.clone(), config.ledger.clone()));
    let engine = Arc::new(BetEngine::new(store, wallets, config.betting.clone()));
    tracing::info!(
        "Ledger ready (commission {}, house wallet user {})",
        config.betting.commission_rate,
        config.ledger.house_user_id
    );

    let sweeper = Sweeper::new(engine, config.sweep);

    if args.once {
        let report = sweeper.sweep(chrono::Utc::now()).await;
        tracing::info!(
            "Single sweep finished: {} expired, {} failed",
            report.expired.len(),
            report.failed
        );
        db.close().await;
        return Ok(());
    }

    // Catching signals for a graceful stop.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    set_handler(move || {
        let _ = shutdown_tx.send(true);
    })?;

    tracing::info!("Daemon is running. Press Ctrl+C to stop.");
    sweeper.run(Some(db.clone()), shutdown_rx).await;

    tracing::info!("Shutting down daemon...");
    db.close().await;
    Ok(())
}
