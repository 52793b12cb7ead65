//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tracker_connections_accepted_total` (counter)
//! - `tracker_active_connections` (gauge)
//! - `tracker_accept_errors_total` (counter)
//! - `tracker_requests_total` (counter): by method (standard methods, else
//!   `other`), status
//! - `tracker_request_duration_seconds` (histogram)
//! - `tracker_rate_limited_total` (counter)
//! - `tracker_parse_errors_total` (counter): by kind
//! - `tracker_registry_operations_total` (counter): by op, outcome
//! - `tracker_rate_limit_entries` (gauge)
//! - `tracker_rate_limit_swept_total` (counter)
//!
//! All recorders go through the `metrics` facade and are no-ops until
//! [`init_metrics`] installs the Prometheus exporter.

use std::net::SocketAddr;
use std::time::Instant;

use axum::http::Method;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connection_accepted() {
    counter!("tracker_connections_accepted_total").increment(1);
}

pub fn record_active_connections(count: usize) {
    gauge!("tracker_active_connections").set(count as f64);
}

pub fn record_accept_error() {
    counter!("tracker_accept_errors_total").increment(1);
}

pub fn record_request(method: &Method, status: u16, start: Instant) {
    counter!(
        "tracker_requests_total",
        "method" => method_label(method),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("tracker_request_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited() {
    counter!("tracker_rate_limited_total").increment(1);
}

pub fn record_parse_error(kind: &'static str) {
    counter!("tracker_parse_errors_total", "kind" => kind).increment(1);
}

pub fn record_registry_op(op: &'static str, outcome: &'static str) {
    counter!("tracker_registry_operations_total", "op" => op, "outcome" => outcome).increment(1);
}

pub fn record_rate_limit_sweep(removed: usize, remaining: usize) {
    counter!("tracker_rate_limit_swept_total").increment(removed as u64);
    gauge!("tracker_rate_limit_entries").set(remaining as f64);
}

const STANDARD_METHODS: [&str; 9] = [
    "GET", "PUT", "POST", "HEAD", "DELETE", "OPTIONS", "PATCH", "CONNECT", "TRACE",
];

/// Label value for a request method. Extension methods share one series.
fn method_label(method: &Method) -> &'static str {
    STANDARD_METHODS
        .iter()
        .copied()
        .find(|standard| *standard == method.as_str())
        .unwrap_or("other")
}
