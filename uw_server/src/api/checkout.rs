//! Checkout gateway API handlers.
//!
//! The endpoints a checkout orchestrator calls over an order's lifetime:
//!
//! 1. `GET  /checkout/availability` while rendering payment methods
//! 2. `POST /checkout/pay` when the shopper places the order
//! 3. `POST /checkout/complete` or `POST /checkout/cancel` once the order settles
//! 4. `POST /checkout/refund` for later refunds
//!
//! Declines carry the shopper-facing notice in the `error` field.

use axum::{
    Json,
    extract::{Query, State},
};
use serde::Deserialize;
use user_wallet::checkout::{Availability, CheckoutOrder, PaymentOutcome};
use user_wallet::wallet::{Amount, LedgerEntry, Reservation, ReservationToken, UserId};

use super::request_id::RequestId;
use super::{ApiError, AppState, observe};

#[derive(Debug, Deserialize)]
pub struct AvailabilityQuery {
    /// Absent for guests
    pub user_id: Option<UserId>,
    pub cart_total: Amount,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub user_id: UserId,
    pub amount: Amount,
    /// Unique per refund; retries with the same value pay out once
    pub refund_reference: String,
}

pub async fn availability(
    State(state): State<AppState>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<Json<Availability>, ApiError> {
    let availability = observe(
        "availability",
        query.user_id,
        state.gateway.is_available(query.user_id, query.cart_total),
    )
    .await
    .map_err(|e| ApiError::from_checkout(e, state.gateway.settings()))?;

    Ok(Json(availability))
}

/// Reserve the order total. Resubmitting an order returns the original payment.
///
/// # Errors
///
/// - `402 Payment Required`: balance does not cover the total
/// - `409 Conflict`: the order was already cancelled
/// - `422 Unprocessable Entity`: cart contains wallet credit, or invalid total
pub async fn pay(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(order): Json<CheckoutOrder>,
) -> Result<Json<PaymentOutcome>, ApiError> {
    let outcome = observe(
        "process_payment",
        Some(order.user_id),
        state.gateway.process_payment(&order),
    )
    .await
    .map_err(|e| ApiError::from_checkout(e, state.gateway.settings()))?;

    tracing::info!(
        request_id = request_id.as_str(),
        user_id = order.user_id,
        order_id = %order.order_id,
        reservation_id = outcome.token.reservation_id,
        amount = outcome.amount,
        "Wallet payment reserved"
    );
    Ok(Json(outcome))
}

/// Order fulfilled; the debit becomes final.
pub async fn complete(
    State(state): State<AppState>,
    Json(token): Json<ReservationToken>,
) -> Result<Json<Reservation>, ApiError> {
    let reservation = observe(
        "capture",
        Some(token.user_id),
        state.gateway.complete_order(&token),
    )
    .await
    .map_err(|e| ApiError::from_checkout(e, state.gateway.settings()))?;

    Ok(Json(reservation))
}

/// Order failed or was cancelled; the reserved funds go back.
pub async fn cancel(
    State(state): State<AppState>,
    request_id: RequestId,
    Json(token): Json<ReservationToken>,
) -> Result<Json<Reservation>, ApiError> {
    let reservation = observe(
        "release",
        Some(token.user_id),
        state.gateway.cancel_order(&token),
    )
    .await
    .map_err(|e| ApiError::from_checkout(e, state.gateway.settings()))?;

    tracing::info!(
        request_id = request_id.as_str(),
        user_id = token.user_id,
        order_id = %token.order_reference,
        "Wallet payment released"
    );
    Ok(Json(reservation))
}

pub async fn refund(
    State(state): State<AppState>,
    Json(request): Json<RefundRequest>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let entry = observe(
        "refund",
        Some(request.user_id),
        state
            .gateway
            .refund_order(request.user_id, request.amount, &request.refund_reference),
    )
    .await
    .map_err(|e| ApiError::from_checkout(e, state.gateway.settings()))?;

    Ok(Json(entry))
}
