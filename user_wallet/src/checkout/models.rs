//! Checkout data models and gateway settings.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::db::config::parse_env_or;
use crate::wallet::{Amount, ReservationToken, UserId};

/// Order status applied by the orchestrator after a successful wallet payment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Completed,
    Processing,
    OnHold,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Completed => write!(f, "completed"),
            OrderStatus::Processing => write!(f, "processing"),
            OrderStatus::OnHold => write!(f, "on_hold"),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "completed" => Ok(OrderStatus::Completed),
            "processing" => Ok(OrderStatus::Processing),
            "on_hold" | "on-hold" => Ok(OrderStatus::OnHold),
            other => Err(format!("unknown order status {other}")),
        }
    }
}

/// Gateway settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewaySettings {
    /// Whether wallet payments are offered at all
    pub enabled: bool,
    /// Payment method title shown at checkout
    pub title: String,
    /// Payment method description shown at checkout
    pub description: String,
    /// Instructions for the thank-you page and order emails
    pub instructions: String,
    /// Status the order moves to once paid
    pub success_status: OrderStatus,
    /// Product category that marks wallet top-up products
    pub credit_category: String,
    pub insufficient_funds_notice: String,
    pub credit_purchase_notice: String,
    pub system_error_notice: String,
}

impl GatewaySettings {
    /// Create settings from environment variables
    ///
    /// - `GATEWAY_ENABLED` (default: true)
    /// - `GATEWAY_TITLE`, `GATEWAY_DESCRIPTION`, `GATEWAY_INSTRUCTIONS`
    /// - `GATEWAY_SUCCESS_STATUS` (completed | processing | on_hold, default: completed)
    /// - `GATEWAY_CREDIT_CATEGORY` (default: credit)
    /// - `GATEWAY_INSUFFICIENT_FUNDS_NOTICE`, `GATEWAY_CREDIT_PURCHASE_NOTICE`,
    ///   `GATEWAY_SYSTEM_ERROR_NOTICE`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: parse_env_or("GATEWAY_ENABLED", defaults.enabled),
            title: parse_env_or("GATEWAY_TITLE", defaults.title),
            description: parse_env_or("GATEWAY_DESCRIPTION", defaults.description),
            instructions: parse_env_or("GATEWAY_INSTRUCTIONS", defaults.instructions),
            success_status: parse_env_or("GATEWAY_SUCCESS_STATUS", defaults.success_status),
            credit_category: parse_env_or("GATEWAY_CREDIT_CATEGORY", defaults.credit_category),
            insufficient_funds_notice: parse_env_or(
                "GATEWAY_INSUFFICIENT_FUNDS_NOTICE",
                defaults.insufficient_funds_notice,
            ),
            credit_purchase_notice: parse_env_or(
                "GATEWAY_CREDIT_PURCHASE_NOTICE",
                defaults.credit_purchase_notice,
            ),
            system_error_notice: parse_env_or(
                "GATEWAY_SYSTEM_ERROR_NOTICE",
                defaults.system_error_notice,
            ),
        }
    }
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            title: "User Wallet".to_string(),
            description: "Pay using your Wallet.".to_string(),
            instructions: "Pay using your Wallet".to_string(),
            success_status: OrderStatus::Completed,
            credit_category: "credit".to_string(),
            insufficient_funds_notice:
                "Insufficient funds. Please purchase more credits or use a different payment method."
                    .to_string(),
            credit_purchase_notice:
                "You can not purchase virtual money with virtual money. Please choose another payment method."
                    .to_string(),
            system_error_notice:
                "There was an error processing the payment. Please try another payment method."
                    .to_string(),
        }
    }
}

/// One line of the cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: i64,
    pub quantity: u32,
    #[serde(default)]
    pub categories: Vec<String>,
}

impl CartItem {
    pub fn in_category(&self, category: &str) -> bool {
        self.categories.iter().any(|c| c.eq_ignore_ascii_case(category))
    }
}

/// Order submitted for wallet payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutOrder {
    pub order_id: String,
    pub user_id: UserId,
    /// Order total in minor units
    pub total: Amount,
    #[serde(default)]
    pub items: Vec<CartItem>,
}

/// Why the wallet gateway is not offered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    GatewayDisabled,
    NotLoggedIn,
    InsufficientBalance,
}

/// Whether to offer "pay with wallet" for a cart
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub reason: Option<UnavailableReason>,
}

impl Availability {
    pub fn available() -> Self {
        Self {
            available: true,
            reason: None,
        }
    }

    pub fn unavailable(reason: UnavailableReason) -> Self {
        Self {
            available: false,
            reason: Some(reason),
        }
    }
}

/// Successful wallet payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentOutcome {
    pub token: ReservationToken,
    pub amount: Amount,
    pub order_status: OrderStatus,
    pub balance_after: Amount,
    pub instructions: String,
}
