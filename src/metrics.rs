//! Prometheus metrics for the admission pipeline.
//!
//! Recording functions are cheap no-ops until [`init_metrics`] installs the
//! exporter, so interceptors call them unconditionally.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `gatehouse_admissions_total` - Requests admitted by the rate limiter
//! - `gatehouse_denials_total` - Requests denied by the rate limiter
//! - `gatehouse_auth_failures_total` - Authentication failures (label: reason)
//! - `gatehouse_evictions_total` - Idle visitors removed by the sweeper
//!
//! ## Histograms
//! - `gatehouse_request_duration_seconds` - Request duration (labels: path, method, status)
//!
//! ## Gauges
//! - `gatehouse_tracked_visitors` - Visitors currently held by the limiter

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Metric names as constants for consistency.
pub mod names {
    pub const ADMISSIONS_TOTAL: &str = "gatehouse_admissions_total";
    pub const DENIALS_TOTAL: &str = "gatehouse_denials_total";
    pub const AUTH_FAILURES_TOTAL: &str = "gatehouse_auth_failures_total";
    pub const EVICTIONS_TOTAL: &str = "gatehouse_evictions_total";
    pub const REQUEST_DURATION_SECONDS: &str = "gatehouse_request_duration_seconds";
    pub const TRACKED_VISITORS: &str = "gatehouse_tracked_visitors";
}

/// Install the Prometheus exporter with an HTTP listener on `metrics_addr`.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::ADMISSIONS_TOTAL,
        "Requests admitted by the sliding-window limiter"
    );
    describe_counter!(
        names::DENIALS_TOTAL,
        "Requests denied by the sliding-window limiter"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Authentication failures by reason"
    );
    describe_counter!(
        names::EVICTIONS_TOTAL,
        "Idle visitor records evicted by the background sweep"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "Request processing time in seconds"
    );
    describe_gauge!(
        names::TRACKED_VISITORS,
        "Visitor records currently held by the limiter"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

// =============================================================================
// Counters
// =============================================================================

pub fn record_admission() {
    counter!(names::ADMISSIONS_TOTAL).increment(1);
}

pub fn record_denial() {
    counter!(names::DENIALS_TOTAL).increment(1);
}

/// Record an authentication failure. `reason` is a short static label.
pub fn record_auth_failure(reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "reason" => reason).increment(1);
}

pub fn record_evictions(count: usize) {
    counter!(names::EVICTIONS_TOTAL).increment(count as u64);
}

// =============================================================================
// Histograms and Gauges
// =============================================================================

pub fn record_request_duration(path: &str, method: &str, status: u16, duration_secs: f64) {
    histogram!(
        names::REQUEST_DURATION_SECONDS,
        "path" => path.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .record(duration_secs);
}

pub fn set_tracked_visitors(count: usize) {
    gauge!(names::TRACKED_VISITORS).set(count as f64);
}
