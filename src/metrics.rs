//! Prometheus metrics for the admission and caching pipeline.
//!
//! Metrics are exposed via a dedicated HTTP listener (default: `0.0.0.0:9090`).
//! Recording functions are safe to call before (or without) initialization;
//! the `metrics` facade discards events when no recorder is installed.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `edge_rate_limit_rejections_total` - Requests rejected with 429
//! - `edge_rate_limit_store_errors_total` - Counter batch failures (fail-closed 500)
//! - `edge_cache_lookups_total` - Cache reads (label: `result` = hit | miss | error)
//! - `edge_cache_stores_total` - Cache writes (label: `result` = stored | skipped | error)
//! - `edge_cache_invalidations_total` - Pattern deletions (label: `result` = ok | error)
//! - `edge_auth_failures_total` - Auth gate failures (labels: `gate`, `reason`)
//!
//! ## Histograms
//! - `edge_request_duration_seconds` - Request duration (labels: endpoint, method, status)

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "edge_rate_limit_rejections_total";
    pub const RATE_LIMIT_STORE_ERRORS_TOTAL: &str = "edge_rate_limit_store_errors_total";
    pub const CACHE_LOOKUPS_TOTAL: &str = "edge_cache_lookups_total";
    pub const CACHE_STORES_TOTAL: &str = "edge_cache_stores_total";
    pub const CACHE_INVALIDATIONS_TOTAL: &str = "edge_cache_invalidations_total";
    pub const AUTH_FAILURES_TOTAL: &str = "edge_auth_failures_total";
    pub const REQUEST_DURATION_SECONDS: &str = "edge_request_duration_seconds";
}

/// Initialize the Prometheus metrics exporter.
///
/// # Errors
///
/// Returns a message if the exporter cannot bind or a recorder is already installed.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Total number of requests rejected by the rate limiter"
    );
    describe_counter!(
        names::RATE_LIMIT_STORE_ERRORS_TOTAL,
        "Total number of rate limiter store failures (request rejected with 500)"
    );
    describe_counter!(
        names::CACHE_LOOKUPS_TOTAL,
        "Total number of response cache lookups by result"
    );
    describe_counter!(
        names::CACHE_STORES_TOTAL,
        "Total number of response cache write attempts by result"
    );
    describe_counter!(
        names::CACHE_INVALIDATIONS_TOTAL,
        "Total number of cache pattern invalidations by result"
    );
    describe_counter!(
        names::AUTH_FAILURES_TOTAL,
        "Total number of authentication/authorization failures by gate and reason"
    );

    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counter Recording Functions
// =============================================================================

pub fn record_rate_limit_rejection() {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL).increment(1);
}

pub fn record_rate_limit_store_error() {
    counter!(names::RATE_LIMIT_STORE_ERRORS_TOTAL).increment(1);
}

/// Record a cache lookup. `result` is `hit`, `miss` or `error`.
pub fn record_cache_lookup(result: &'static str) {
    counter!(names::CACHE_LOOKUPS_TOTAL, "result" => result).increment(1);
}

/// Record a cache write attempt. `result` is `stored`, `skipped` or `error`.
pub fn record_cache_store(result: &'static str) {
    counter!(names::CACHE_STORES_TOTAL, "result" => result).increment(1);
}

pub fn record_cache_invalidation(result: &'static str) {
    counter!(names::CACHE_INVALIDATIONS_TOTAL, "result" => result).increment(1);
}

/// Record an auth gate failure, e.g. `("required", "missing_credential")`.
pub fn record_auth_failure(gate: &'static str, reason: &'static str) {
    counter!(names::AUTH_FAILURES_TOTAL, "gate" => gate, "reason" => reason).increment(1);
}

// =============================================================================
// Histogram Recording Functions
// =============================================================================

/// Record HTTP request duration.
pub fn record_request_duration(endpoint: &str, method: &str, status: &str, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "endpoint" => endpoint.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;

    // These only verify the functions don't panic without a recorder installed.

    #[test]
    fn test_record_rate_limit_events() {
        record_rate_limit_rejection();
        record_rate_limit_store_error();
    }

    #[test]
    fn test_record_cache_events() {
        record_cache_lookup("hit");
        record_cache_lookup("miss");
        record_cache_store("stored");
        record_cache_invalidation("ok");
    }

    #[test]
    fn test_record_auth_failure() {
        record_auth_failure("admin", "forbidden");
    }

    #[test]
    fn test_record_request_duration() {
        record_request_duration("/stats", "GET", "200", 0.1);
    }
}
