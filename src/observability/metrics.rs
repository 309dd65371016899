//! Metrics collection and exposition.
//!
//! # Metrics
//! - `push_associations_total` (counter): association attempts by outcome
//! - `push_streams_total` (counter): push streams opened or refused by the transport
//! - `push_completions_total` (counter): pushed bodies finished or failed
//! - `push_registry_main_resources` (gauge): main resources tracked
//!
//! # Design Decisions
//! - Recorded through the `metrics` facade; a no-op until a recorder is installed
//! - The registry gauge exists because the number of main resources is unbounded

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

/// Outcome is `added` or a rejection label.
pub fn record_association(outcome: &'static str) {
    metrics::counter!("push_associations_total", "outcome" => outcome).increment(1);
}

pub fn record_push_stream(result: &'static str) {
    metrics::counter!("push_streams_total", "result" => result).increment(1);
}

pub fn record_push_completed(result: &'static str) {
    metrics::counter!("push_completions_total", "result" => result).increment(1);
}

pub fn record_registry_size(size: usize) {
    metrics::gauge!("push_registry_main_resources").set(size as f64);
}
