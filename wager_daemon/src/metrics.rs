//! Prometheus metrics for the expiry sweep and database health.
//!
//! Without an installed exporter every recording call is a no-op.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

/// Add to the count of bets moved to `expired`.
pub fn bets_expired_total(count: usize) {
    metrics::counter!("bets_expired_total").increment(count as u64);
}

/// Record sweep duration in milliseconds.
pub fn sweep_duration_ms(duration_ms: f64) {
    metrics::histogram!("sweep_duration_ms").record(duration_ms);
}

/// Add to the count of bets or sweeps that failed.
pub fn sweep_errors_total(count: usize) {
    metrics::counter!("sweep_errors_total").increment(count as u64);
}

/// Set database health status (1 = healthy, 0 = unhealthy).
pub fn database_healthy(healthy: bool) {
    metrics::gauge!("database_healthy").set(if healthy { 1.0 } else { 0.0 });
}
