//! HTTP API for the wallet ledger.
//!
//! Two groups of endpoints share one router: wallet administration and the
//! checkout gateway. Every `/api/v1` route requires the service bearer token.
//!
//! # Modules
//!
//! - [`wallets`]: balances, entries, audits and admin adjustments
//! - [`checkout`]: availability, payment, completion, cancellation, refunds
//! - [`middleware`]: service-token authentication
//! - [`request_id`]: request correlation and HTTP metrics
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use user_wallet::{GatewaySettings, MemoryLedgerStore, WalletLedger};
//! use uw_server::api::{AppState, create_router};
//! use uw_server::config::CurrencyConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = Arc::new(WalletLedger::new(Arc::new(MemoryLedgerStore::new())));
//! let state = AppState::new(
//!     ledger,
//!     GatewaySettings::default(),
//!     CurrencyConfig::default(),
//!     "0123456789abcdef0123456789abcdef",
//!     None,
//! );
//!
//! let app = create_router(state);
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod checkout;
pub mod middleware;
pub mod request_id;
pub mod wallets;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use user_wallet::{
    CheckoutError, Database, GatewaySettings, WalletError, WalletGateway, WalletLedger,
    wallet::UserId,
};

use crate::config::CurrencyConfig;
use crate::{logging, metrics};

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request; everything heavy sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<WalletLedger>,
    pub gateway: Arc<WalletGateway>,
    pub currency: CurrencyConfig,
    /// SHA-256 of the service token
    pub(crate) api_token_digest: Arc<Vec<u8>>,
    /// Present when the ledger is PostgreSQL-backed; checked by `/health`
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        ledger: Arc<WalletLedger>,
        gateway_settings: GatewaySettings,
        currency: CurrencyConfig,
        api_token: &str,
        database: Option<Database>,
    ) -> Self {
        let gateway = Arc::new(WalletGateway::new(ledger.clone(), gateway_settings));
        Self {
            ledger,
            gateway,
            currency,
            api_token_digest: Arc::new(Sha256::digest(api_token.as_bytes()).to_vec()),
            database,
        }
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// # Endpoint Summary
///
/// ```text
/// GET  /health                                           - Health check (public)
/// GET  /api/v1/wallets/{user_id}                         - Balance
/// GET  /api/v1/wallets/{user_id}/sufficient?amount=      - Balance covers amount?
/// GET  /api/v1/wallets/{user_id}/entries?limit=          - Newest-first entries
/// GET  /api/v1/wallets/{user_id}/audit                   - Balance vs entry sum
/// GET  /api/v1/wallets/{user_id}/reservations/{order}    - Reservation for an order
/// POST /api/v1/wallets/{user_id}/credit                  - Credit
/// POST /api/v1/wallets/{user_id}/debit                   - Admin debit
/// PUT  /api/v1/wallets/{user_id}/balance                 - Set balance
/// POST /api/v1/wallets/{user_id}/disable                 - Soft-disable
/// POST /api/v1/wallets/{user_id}/enable                  - Re-enable
/// GET  /api/v1/checkout/availability?user_id=&cart_total=
/// POST /api/v1/checkout/pay                              - Reserve order total
/// POST /api/v1/checkout/complete                         - Capture
/// POST /api/v1/checkout/cancel                           - Release
/// POST /api/v1/checkout/refund                           - Refund credit
/// ```
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    let wallet_routes = Router::new()
        .route("/wallets/{user_id}", get(wallets::get_wallet))
        .route("/wallets/{user_id}/sufficient", get(wallets::is_sufficient))
        .route("/wallets/{user_id}/entries", get(wallets::list_entries))
        .route("/wallets/{user_id}/audit", get(wallets::audit))
        .route(
            "/wallets/{user_id}/reservations/{order_reference}",
            get(wallets::get_reservation),
        )
        .route("/wallets/{user_id}/credit", post(wallets::credit))
        .route("/wallets/{user_id}/debit", post(wallets::debit))
        .route("/wallets/{user_id}/balance", put(wallets::set_balance))
        .route("/wallets/{user_id}/disable", post(wallets::disable))
        .route("/wallets/{user_id}/enable", post(wallets::enable));

    let checkout_routes = Router::new()
        .route("/checkout/availability", get(checkout::availability))
        .route("/checkout/pay", post(checkout::pay))
        .route("/checkout/complete", post(checkout::complete))
        .route("/checkout/cancel", post(checkout::cancel))
        .route("/checkout/refund", post(checkout::refund));

    // route_layer: unknown paths still 404 instead of 401
    Router::new()
        .merge(wallet_routes)
        .merge(checkout_routes)
        .route_layer(axum::middleware::from_fn_with_state(
            state,
            middleware::auth_middleware,
        ))
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when storage is reachable, `503 Service Unavailable` otherwise.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (storage, db_healthy) = match &state.database {
        Some(db) => ("postgres", db.health_check().await.is_ok()),
        None => ("memory", true),
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": storage,
        "database": db_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Error returned by every handler
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Map a checkout failure, using the gateway's shopper notices where one applies
    pub fn from_checkout(err: CheckoutError, settings: &GatewaySettings) -> Self {
        match err {
            CheckoutError::Wallet(e) if !matches!(e, WalletError::InsufficientFunds { .. }) => {
                ApiError::from(e)
            }
            err => {
                let status = match &err {
                    CheckoutError::GatewayDisabled => StatusCode::FORBIDDEN,
                    CheckoutError::CreditPurchase { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    CheckoutError::OrderClosed { .. } | CheckoutError::AmountMismatch { .. } => {
                        StatusCode::CONFLICT
                    }
                    CheckoutError::Wallet(_) => StatusCode::PAYMENT_REQUIRED,
                };
                Self::new(status, err.customer_notice(settings))
            }
        }
    }
}

impl From<WalletError> for ApiError {
    fn from(err: WalletError) -> Self {
        let status = match &err {
            WalletError::InvalidAmount(_) | WalletError::InvalidReference(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            WalletError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
            WalletError::InvalidStateTransition { .. }
            | WalletError::IdempotencyMismatch { .. } => StatusCode::CONFLICT,
            WalletError::ReservationNotFound(_) => StatusCode::NOT_FOUND,
            WalletError::AccountDisabled(_) => StatusCode::FORBIDDEN,
            WalletError::ConcurrencyConflict { .. }
            | WalletError::LockTimeout { .. }
            | WalletError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            WalletError::BalanceOverflow
            | WalletError::Database(_)
            | WalletError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "Ledger operation failed");
        }

        Self::new(status, err.client_message())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

/// Short label for the metrics `outcome` dimension
pub(crate) trait OutcomeLabel {
    fn outcome(&self) -> &'static str;
}

impl OutcomeLabel for WalletError {
    fn outcome(&self) -> &'static str {
        match self {
            WalletError::InvalidAmount(_) | WalletError::InvalidReference(_) => "invalid_input",
            WalletError::InsufficientFunds { .. } => "insufficient_funds",
            WalletError::InvalidStateTransition { .. } => "invalid_transition",
            WalletError::ReservationNotFound(_) => "not_found",
            WalletError::AccountDisabled(_) => "account_disabled",
            WalletError::IdempotencyMismatch { .. } => "idempotency_mismatch",
            WalletError::ConcurrencyConflict { .. } => "conflict",
            WalletError::LockTimeout { .. } => "lock_timeout",
            WalletError::Timeout(_) => "timeout",
            WalletError::BalanceOverflow
            | WalletError::Database(_)
            | WalletError::Storage(_) => "error",
        }
    }
}

impl OutcomeLabel for CheckoutError {
    fn outcome(&self) -> &'static str {
        match self {
            CheckoutError::GatewayDisabled => "gateway_disabled",
            CheckoutError::CreditPurchase { .. } => "credit_purchase",
            CheckoutError::OrderClosed { .. } => "order_closed",
            CheckoutError::AmountMismatch { .. } => "amount_mismatch",
            CheckoutError::Wallet(e) => e.outcome(),
        }
    }
}

/// Run a ledger call, recording its duration and outcome.
pub(crate) async fn observe<T, E, F>(
    operation: &'static str,
    user_id: Option<UserId>,
    call: F,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: OutcomeLabel,
{
    let started = Instant::now();
    let result = call.await;
    let elapsed = started.elapsed();

    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.outcome(),
    };
    metrics::ledger_operations_total(operation, outcome);
    metrics::ledger_operation_duration_ms(operation, elapsed.as_secs_f64() * 1000.0);
    logging::log_ledger_operation(operation, user_id, outcome, elapsed.as_millis() as u64);

    result
}
