//! Structured logging configuration.
//!
//! The ledger library logs through the `log` facade; the subscriber installed
//! here picks those records up alongside the server's own `tracing` events.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Ledger calls slower than this are logged at warn level
pub const SLOW_OPERATION_MS: u64 = 500;

/// Initialize structured logging
///
/// Log levels come from `RUST_LOG` (default: `info,sqlx=warn,hyper=warn`).
///
/// # Example
///
/// ```no_run
/// use uw_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // try_init: tests may build several routers in one process
    if tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .is_ok()
    {
        tracing::info!("Structured logging initialized");
    }
}

/// Log security event with structured data
///
/// # Example
///
/// ```
/// use uw_server::logging::log_security_event;
///
/// log_security_event("invalid_token", "/api/v1/wallets/7", "Bearer token mismatch");
/// ```
pub fn log_security_event(event_type: &str, path: &str, message: &str) {
    tracing::warn!(
        event_type = event_type,
        http_path = path,
        "SECURITY: {}",
        message
    );
}

/// Log the duration and outcome of a ledger call
pub fn log_ledger_operation(operation: &str, user_id: Option<i64>, outcome: &str, duration_ms: u64) {
    if duration_ms > SLOW_OPERATION_MS {
        tracing::warn!(
            operation = operation,
            user_id = user_id,
            outcome = outcome,
            duration_ms = duration_ms,
            "PERFORMANCE: Slow ledger operation"
        );
    } else {
        tracing::debug!(
            operation = operation,
            user_id = user_id,
            outcome = outcome,
            duration_ms = duration_ms,
            "Ledger operation"
        );
    }
}
