//! Wallet error types.

use super::models::{ReservationState, UserId};
use crate::db::timeouts::TimeoutError;
use std::time::Duration;
use thiserror::Error;

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    /// Invalid amount (must be positive)
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// Order reference is empty or too long
    #[error("Invalid order reference: {0:?}")]
    InvalidReference(String),

    /// Insufficient balance
    #[error("Insufficient funds: available {available}, required {required}")]
    InsufficientFunds {
        user_id: UserId,
        available: i64,
        required: i64,
    },

    /// Reservation lifecycle misuse (e.g. capturing a released reservation)
    #[error("Invalid reservation transition from {from} to {to}")]
    InvalidStateTransition {
        from: ReservationState,
        to: ReservationState,
    },

    /// No reservation matches the token or order reference
    #[error("Reservation not found for order {0}")]
    ReservationNotFound(String),

    /// Account is soft-disabled
    #[error("Account {0} is disabled")]
    AccountDisabled(UserId),

    /// Reference already recorded for a request with a different effect
    #[error("Reference {reference} already recorded {recorded}, request asked for {requested}")]
    IdempotencyMismatch {
        reference: String,
        recorded: i64,
        requested: i64,
    },

    /// Optimistic commit kept losing to concurrent writers
    #[error("Concurrent update on account {user_id} after {attempts} attempts")]
    ConcurrencyConflict { user_id: UserId, attempts: u32 },

    /// Account lock was not acquired in time
    #[error("Account {user_id} lock not acquired within {waited:?}")]
    LockTimeout { user_id: UserId, waited: Duration },

    /// Balance would overflow
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Non-database storage failure
    #[error("Storage failure: {0}")]
    Storage(String),

    /// Storage operation exceeded its deadline
    #[error("Storage operation timed out after {0:?}")]
    Timeout(Duration),
}

impl From<TimeoutError> for WalletError {
    fn from(err: TimeoutError) -> Self {
        match err {
            TimeoutError::Timeout(duration) => WalletError::Timeout(duration),
            TimeoutError::Database(e) => WalletError::Database(e),
        }
    }
}

impl WalletError {
    /// Whether this error is an expected business outcome that may be shown
    /// to the shopper ("use another payment method").
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            WalletError::InvalidAmount(_) | WalletError::InsufficientFunds { .. }
        )
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            WalletError::ConcurrencyConflict { .. }
                | WalletError::LockTimeout { .. }
                | WalletError::Timeout(_)
        )
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Caller mistakes get a short description without echoing identifiers;
    /// operational failures collapse to a generic message.
    pub fn client_message(&self) -> String {
        match self {
            WalletError::InsufficientFunds { .. } => "Insufficient funds".to_string(),
            WalletError::InvalidAmount(_) => "Invalid amount".to_string(),
            WalletError::InvalidReference(_) => "Invalid order reference".to_string(),
            WalletError::InvalidStateTransition { from, to } => {
                format!("Reservation is {from} and cannot become {to}")
            }
            WalletError::ReservationNotFound(_) => "Reservation not found".to_string(),
            WalletError::AccountDisabled(_) => "Wallet is disabled".to_string(),
            WalletError::IdempotencyMismatch { .. } => {
                "Reference already used for a different request".to_string()
            }
            WalletError::ConcurrencyConflict { .. }
            | WalletError::LockTimeout { .. }
            | WalletError::Timeout(_) => {
                "Wallet is busy, please retry".to_string()
            }
            _ => "Internal server error".to_string(),
        }
    }
}

/// Result type for wallet operations
pub type WalletResult<T> = Result<T, WalletError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_business_outcomes_are_user_facing() {
        assert!(WalletError::InvalidAmount(0).is_user_facing());
        assert!(
            WalletError::InsufficientFunds {
                user_id: 1,
                available: 10,
                required: 20
            }
            .is_user_facing()
        );
        assert!(!WalletError::Storage("disk".to_string()).is_user_facing());
        assert!(!WalletError::AccountDisabled(7).is_user_facing());
        assert!(
            !WalletError::ConcurrencyConflict {
                user_id: 1,
                attempts: 3
            }
            .is_user_facing()
        );
    }

    #[test]
    fn test_client_message_hides_internals() {
        let err = WalletError::Storage("connection reset by 10.0.0.7".to_string());
        assert_eq!(err.client_message(), "Internal server error");

        let err = WalletError::ReservationNotFound("order-9".to_string());
        assert!(!err.client_message().contains("order-9"));
    }

    #[test]
    fn test_transient_errors() {
        assert!(WalletError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(
            WalletError::ConcurrencyConflict {
                user_id: 2,
                attempts: 3
            }
            .is_transient()
        );
        assert!(
            WalletError::LockTimeout {
                user_id: 2,
                waited: Duration::from_millis(5)
            }
            .is_transient()
        );
        assert!(!WalletError::BalanceOverflow.is_transient());
    }

    #[test]
    fn test_idempotency_mismatch_is_not_retryable() {
        let err = WalletError::IdempotencyMismatch {
            reference: "adj-7".to_string(),
            recorded: 500,
            requested: -200,
        };
        assert!(!err.is_transient());
        assert!(!err.is_user_facing());
        assert!(!err.client_message().contains("adj-7"));
    }

    #[test]
    fn test_timeout_error_conversion() {
        let err: WalletError = TimeoutError::Timeout(Duration::from_secs(10)).into();
        assert!(matches!(err, WalletError::Timeout(d) if d.as_secs() == 10));
    }
}
