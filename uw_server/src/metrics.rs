//! Prometheus metrics for the wallet service.
//!
//! Metrics are recorded through the `metrics` facade and exposed in
//! Prometheus text format when an exporter address is configured.
//!
//! # Metrics
//!
//! - `http_requests_total{method, path, status}`
//! - `http_request_duration_ms{method, path}`
//! - `ledger_operations_total{operation, outcome}`
//! - `ledger_operation_duration_ms{operation}`
//! - `auth_failures_total{reason}`
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use uw_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::ledger_operations_total("reserve", "ok");
//! ```

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

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, path: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// Ledger Metrics
// ============================================================================

/// Count a ledger call by operation and outcome (`ok` or an error label).
pub fn ledger_operations_total(operation: &'static str, outcome: &'static str) {
    metrics::counter!("ledger_operations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Record ledger call duration in milliseconds.
pub fn ledger_operation_duration_ms(operation: &'static str, duration_ms: f64) {
    metrics::histogram!("ledger_operation_duration_ms",
        "operation" => operation
    )
    .record(duration_ms);
}

// ============================================================================
// Auth Metrics
// ============================================================================

/// Increment rejected service-token counter.
pub fn auth_failures_total(reason: &'static str) {
    metrics::counter!("auth_failures_total",
        "reason" => reason
    )
    .increment(1);
}
