//! Wallet payment gateway for a checkout orchestrator.

use std::sync::Arc;
use thiserror::Error;

use super::models::{
    Availability, CheckoutOrder, GatewaySettings, PaymentOutcome, UnavailableReason,
};
use crate::wallet::{
    Amount, CreditReason, LedgerEntry, Reservation, ReservationState, ReservationToken, UserId,
    WalletError, WalletLedger,
};

/// Checkout errors
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Gateway switched off in settings
    #[error("Wallet payments are disabled")]
    GatewayDisabled,

    /// Wallet credit cannot buy more wallet credit
    #[error("Cart contains wallet credit product {product_id}")]
    CreditPurchase { product_id: i64 },

    /// The order was paid before and has since been released
    #[error("Order {order_id} is already {state}")]
    OrderClosed {
        order_id: String,
        state: ReservationState,
    },

    /// The order was paid before for a different total
    #[error("Order {order_id} was paid for {reserved}, not {requested}")]
    AmountMismatch {
        order_id: String,
        reserved: Amount,
        requested: Amount,
    },

    #[error(transparent)]
    Wallet(#[from] WalletError),
}

impl CheckoutError {
    /// Expected rejection ("use another payment method") rather than a system fault
    pub fn is_declined(&self) -> bool {
        match self {
            CheckoutError::GatewayDisabled
            | CheckoutError::CreditPurchase { .. }
            | CheckoutError::OrderClosed { .. }
            | CheckoutError::AmountMismatch { .. } => true,
            CheckoutError::Wallet(e) => e.is_user_facing(),
        }
    }

    /// Message to show the shopper
    pub fn customer_notice(&self, settings: &GatewaySettings) -> String {
        match self {
            CheckoutError::CreditPurchase { .. } => settings.credit_purchase_notice.clone(),
            CheckoutError::Wallet(WalletError::InsufficientFunds { .. }) => {
                settings.insufficient_funds_notice.clone()
            }
            CheckoutError::Wallet(e) if e.is_user_facing() => e.client_message(),
            CheckoutError::GatewayDisabled
            | CheckoutError::OrderClosed { .. }
            | CheckoutError::AmountMismatch { .. } => {
                "Wallet payment is not available for this order. Please choose another payment method."
                    .to_string()
            }
            CheckoutError::Wallet(_) => settings.system_error_notice.clone(),
        }
    }
}

/// Result type for checkout operations
pub type CheckoutResult<T> = Result<T, CheckoutError>;

/// Wallet payment gateway
#[derive(Clone)]
pub struct WalletGateway {
    ledger: Arc<WalletLedger>,
    settings: GatewaySettings,
}

impl WalletGateway {
    pub fn new(ledger: Arc<WalletLedger>, settings: GatewaySettings) -> Self {
        Self { ledger, settings }
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn ledger(&self) -> &Arc<WalletLedger> {
        &self.ledger
    }

    /// Decide whether to offer wallet payment for a cart.
    ///
    /// Advisory only: `process_payment` re-checks the balance atomically.
    pub async fn is_available(
        &self,
        user_id: Option<UserId>,
        cart_total: Amount,
    ) -> CheckoutResult<Availability> {
        if !self.settings.enabled {
            return Ok(Availability::unavailable(UnavailableReason::GatewayDisabled));
        }
        let Some(user_id) = user_id else {
            return Ok(Availability::unavailable(UnavailableReason::NotLoggedIn));
        };

        if self.ledger.is_sufficient(user_id, cart_total).await? {
            Ok(Availability::available())
        } else {
            Ok(Availability::unavailable(
                UnavailableReason::InsufficientBalance,
            ))
        }
    }

    /// Take payment for an order by reserving its total.
    ///
    /// Submitting the same order again returns the original payment, provided
    /// the total has not changed.
    pub async fn process_payment(&self, order: &CheckoutOrder) -> CheckoutResult<PaymentOutcome> {
        if !self.settings.enabled {
            return Err(CheckoutError::GatewayDisabled);
        }

        if let Some(item) = order
            .items
            .iter()
            .find(|item| item.in_category(&self.settings.credit_category))
        {
            log::info!(
                "Refused wallet payment for order {}: product {} is wallet credit",
                order.order_id,
                item.product_id
            );
            return Err(CheckoutError::CreditPurchase {
                product_id: item.product_id,
            });
        }

        let reservation = self
            .ledger
            .reserve(order.user_id, order.total, &order.order_id)
            .await
            .inspect_err(|e| log_failure("payment", &order.order_id, e))?;

        if reservation.state == ReservationState::Released {
            return Err(CheckoutError::OrderClosed {
                order_id: order.order_id.clone(),
                state: reservation.state,
            });
        }
        if reservation.amount != order.total {
            log::warn!(
                "Refused payment for order {}: total {} but {} already reserved",
                order.order_id,
                order.total,
                reservation.amount
            );
            return Err(CheckoutError::AmountMismatch {
                order_id: order.order_id.clone(),
                reserved: reservation.amount,
                requested: order.total,
            });
        }

        let balance_after = self.ledger.get_balance(order.user_id).await?;

        Ok(PaymentOutcome {
            token: reservation.token(),
            amount: reservation.amount,
            order_status: self.settings.success_status,
            balance_after,
            instructions: self.settings.instructions.clone(),
        })
    }

    /// Order fulfilled: the debit becomes final.
    pub async fn complete_order(&self, token: &ReservationToken) -> CheckoutResult<Reservation> {
        self.ledger
            .capture(token)
            .await
            .inspect_err(|e| log_failure("completion", &token.order_reference, e))
            .map_err(CheckoutError::from)
    }

    /// Order failed or was cancelled before completion: return the funds.
    pub async fn cancel_order(&self, token: &ReservationToken) -> CheckoutResult<Reservation> {
        self.ledger
            .release(token)
            .await
            .inspect_err(|e| log_failure("cancellation", &token.order_reference, e))
            .map_err(CheckoutError::from)
    }

    /// Refund (part of) a completed order back into the wallet.
    ///
    /// `refund_reference` makes the refund idempotent.
    pub async fn refund_order(
        &self,
        user_id: UserId,
        amount: Amount,
        refund_reference: &str,
    ) -> CheckoutResult<LedgerEntry> {
        self.ledger
            .credit(user_id, amount, CreditReason::Refund, Some(refund_reference))
            .await
            .inspect_err(|e| log_failure("refund", refund_reference, e))
            .map_err(CheckoutError::from)
    }
}

fn log_failure(step: &str, reference: &str, err: &WalletError) {
    if err.is_user_facing() {
        log::info!("Wallet {} for {} declined: {}", step, reference, err);
    } else {
        log::error!("Wallet {} for {} failed: {}", step, reference, err);
    }
}
