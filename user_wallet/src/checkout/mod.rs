//! Checkout gateway: "pay with wallet balance" on top of the ledger.
//!
//! The orchestrator asks [`WalletGateway::is_available`] whether to offer the
//! payment method, calls [`WalletGateway::process_payment`] at payment time,
//! then either [`WalletGateway::complete_order`] or
//! [`WalletGateway::cancel_order`], and [`WalletGateway::refund_order`] for
//! refunds.

pub mod gateway;
pub mod models;

pub use gateway::{CheckoutError, CheckoutResult, WalletGateway};
pub use models::{
    Availability, CartItem, CheckoutOrder, GatewaySettings, OrderStatus, PaymentOutcome,
    UnavailableReason,
};
