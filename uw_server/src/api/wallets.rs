//! Wallet API handlers.
//!
//! Balances, entry history and audits for support staff, plus the admin
//! mutations (credits, debits, set-balance, soft-disable).
//!
//! # Examples
//!
//! ```bash
//! curl http://localhost:8080/api/v1/wallets/7 -H "Authorization: Bearer TOKEN"
//!
//! curl -X POST http://localhost:8080/api/v1/wallets/7/credit \
//!   -H "Authorization: Bearer TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"amount": 1000, "reason": "refund", "reference": "order-42-refund"}'
//! ```

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use user_wallet::wallet::{
    Account, AccountStatus, AdjustmentReason, Amount, AuditReport, CreditReason, LedgerEntry,
    Reservation, UserId, WalletError, format_amount,
};

use super::request_id::RequestId;
use super::{ApiError, AppState, observe};

/// Default page size for entry listings
const DEFAULT_ENTRY_LIMIT: i64 = 50;

#[derive(Debug, Serialize, Deserialize)]
pub struct WalletResponse {
    pub user_id: UserId,
    pub balance: Amount,
    /// Balance rendered in the configured currency, e.g. `"20.00 USD"`
    pub display: String,
    pub currency: String,
    pub status: AccountStatus,
}

#[derive(Debug, Deserialize)]
pub struct SufficientQuery {
    pub amount: Amount,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SufficientResponse {
    pub user_id: UserId,
    pub amount: Amount,
    pub sufficient: bool,
}

#[derive(Debug, Deserialize)]
pub struct EntriesQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreditRequest {
    pub amount: Amount,
    pub reason: CreditReason,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DebitRequest {
    pub amount: Amount,
    pub reason: AdjustmentReason,
    pub reference: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetBalanceRequest {
    pub balance: Amount,
    pub reference: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SetBalanceResponse {
    pub balance: Amount,
    /// `None` when the balance already matched
    pub entry: Option<LedgerEntry>,
}

/// Get a wallet's balance. Unknown users read as an empty active wallet.
pub async fn get_wallet(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<WalletResponse>, ApiError> {
    let account = observe("account", Some(user_id), state.ledger.account(user_id)).await?;
    Ok(Json(wallet_response(&state, account)))
}

/// Check whether the balance covers an amount.
pub async fn is_sufficient(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<SufficientQuery>,
) -> Result<Json<SufficientResponse>, ApiError> {
    let sufficient = observe(
        "is_sufficient",
        Some(user_id),
        state.ledger.is_sufficient(user_id, query.amount),
    )
    .await?;

    Ok(Json(SufficientResponse {
        user_id,
        amount: query.amount,
        sufficient,
    }))
}

/// Newest-first ledger entries.
pub async fn list_entries(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    Query(query): Query<EntriesQuery>,
) -> Result<Json<Vec<LedgerEntry>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_ENTRY_LIMIT);
    let entries = observe("entries", Some(user_id), state.ledger.entries(user_id, limit)).await?;
    Ok(Json(entries))
}

/// Compare the stored balance with the sum of entries.
pub async fn audit(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<AuditReport>, ApiError> {
    let report = observe("audit", Some(user_id), state.ledger.audit(user_id)).await?;
    Ok(Json(report))
}

/// Look up the reservation for an order.
///
/// # Errors
///
/// - `404 Not Found`: no reservation for this order
pub async fn get_reservation(
    State(state): State<AppState>,
    Path((user_id, order_reference)): Path<(UserId, String)>,
) -> Result<Json<Reservation>, ApiError> {
    let reservation = observe(
        "reservation",
        Some(user_id),
        state.ledger.reservation(user_id, &order_reference),
    )
    .await?
    .ok_or(WalletError::ReservationNotFound(order_reference))?;

    Ok(Json(reservation))
}

/// Credit the wallet. With a `reference` the call is idempotent.
pub async fn credit(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    request_id: RequestId,
    Json(request): Json<CreditRequest>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let entry = observe(
        "credit",
        Some(user_id),
        state.ledger.credit(
            user_id,
            request.amount,
            request.reason,
            request.reference.as_deref(),
        ),
    )
    .await?;

    tracing::info!(
        request_id = request_id.as_str(),
        user_id = user_id,
        entry_id = entry.entry_id,
        amount = entry.amount,
        "Wallet credited"
    );
    Ok(Json(entry))
}

/// Admin debit. Refused when the balance does not cover it.
pub async fn debit(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    request_id: RequestId,
    Json(request): Json<DebitRequest>,
) -> Result<Json<LedgerEntry>, ApiError> {
    let entry = observe(
        "debit_adjustment",
        Some(user_id),
        state.ledger.debit_adjustment(
            user_id,
            request.amount,
            request.reason,
            request.reference.as_deref(),
        ),
    )
    .await?;

    tracing::info!(
        request_id = request_id.as_str(),
        user_id = user_id,
        entry_id = entry.entry_id,
        amount = entry.amount,
        "Wallet debited"
    );
    Ok(Json(entry))
}

/// Bring the balance to an absolute value with one adjustment entry.
pub async fn set_balance(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    request_id: RequestId,
    Json(request): Json<SetBalanceRequest>,
) -> Result<Json<SetBalanceResponse>, ApiError> {
    let entry = observe(
        "set_balance",
        Some(user_id),
        state
            .ledger
            .set_balance(user_id, request.balance, request.reference.as_deref()),
    )
    .await?;

    tracing::info!(
        request_id = request_id.as_str(),
        user_id = user_id,
        balance = request.balance,
        changed = entry.is_some(),
        "Wallet balance set"
    );
    Ok(Json(SetBalanceResponse {
        balance: request.balance,
        entry,
    }))
}

pub async fn disable(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<WalletResponse>, ApiError> {
    let account = observe(
        "disable_account",
        Some(user_id),
        state.ledger.disable_account(user_id),
    )
    .await?;
    Ok(Json(wallet_response(&state, account)))
}

pub async fn enable(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<WalletResponse>, ApiError> {
    let account = observe(
        "enable_account",
        Some(user_id),
        state.ledger.enable_account(user_id),
    )
    .await?;
    Ok(Json(wallet_response(&state, account)))
}

fn wallet_response(state: &AppState, account: Account) -> WalletResponse {
    WalletResponse {
        user_id: account.user_id,
        balance: account.balance,
        display: format!(
            "{} {}",
            format_amount(account.balance, state.currency.decimals),
            state.currency.code
        ),
        currency: state.currency.code.clone(),
        status: account.status,
    }
}
