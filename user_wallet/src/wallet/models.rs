//! Wallet data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::errors::WalletError;

/// User ID type
pub type UserId = i64;

/// Monetary amount in integer minor units (cents).
pub type Amount = i64;

/// Account status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Disabled,
}

impl std::fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AccountStatus::Active => write!(f, "active"),
            AccountStatus::Disabled => write!(f, "disabled"),
        }
    }
}

impl FromStr for AccountStatus {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AccountStatus::Active),
            "disabled" => Ok(AccountStatus::Disabled),
            other => Err(WalletError::Storage(format!("unknown account status {other}"))),
        }
    }
}

/// Balance record for one user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub balance: Amount,
    /// Bumped on every committed mutation. Zero means never persisted.
    pub version: i64,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    /// Snapshot of an account that has never transacted.
    pub fn empty(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            balance: 0,
            version: 0,
            status: AccountStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// Ledger entry kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Purchase,
    Refund,
    AdminAdjustment,
    Correction,
    Release,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::Purchase => write!(f, "purchase"),
            EntryKind::Refund => write!(f, "refund"),
            EntryKind::AdminAdjustment => write!(f, "admin_adjustment"),
            EntryKind::Correction => write!(f, "correction"),
            EntryKind::Release => write!(f, "release"),
        }
    }
}

impl FromStr for EntryKind {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "purchase" => Ok(EntryKind::Purchase),
            "refund" => Ok(EntryKind::Refund),
            "admin_adjustment" => Ok(EntryKind::AdminAdjustment),
            "correction" => Ok(EntryKind::Correction),
            "release" => Ok(EntryKind::Release),
            other => Err(WalletError::Storage(format!("unknown entry kind {other}"))),
        }
    }
}

/// Reasons accepted by [`crate::wallet::WalletLedger::credit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditReason {
    Refund,
    AdminAdjustment,
    Correction,
}

impl From<CreditReason> for EntryKind {
    fn from(reason: CreditReason) -> Self {
        match reason {
            CreditReason::Refund => EntryKind::Refund,
            CreditReason::AdminAdjustment => EntryKind::AdminAdjustment,
            CreditReason::Correction => EntryKind::Correction,
        }
    }
}

/// Reasons accepted by [`crate::wallet::WalletLedger::debit_adjustment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    AdminAdjustment,
    Correction,
}

impl From<AdjustmentReason> for EntryKind {
    fn from(reason: AdjustmentReason) -> Self {
        match reason {
            AdjustmentReason::AdminAdjustment => EntryKind::AdminAdjustment,
            AdjustmentReason::Correction => EntryKind::Correction,
        }
    }
}

/// Immutable ledger entry. Negative amounts are debits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub entry_id: i64,
    pub user_id: UserId,
    pub amount: Amount,
    pub balance_after: Amount,
    pub kind: EntryKind,
    pub order_reference: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Reservation lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Reserved,
    Captured,
    Released,
}

impl ReservationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationState::Reserved)
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReservationState::Reserved => write!(f, "reserved"),
            ReservationState::Captured => write!(f, "captured"),
            ReservationState::Released => write!(f, "released"),
        }
    }
}

impl FromStr for ReservationState {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reserved" => Ok(ReservationState::Reserved),
            "captured" => Ok(ReservationState::Captured),
            "released" => Ok(ReservationState::Released),
            other => Err(WalletError::Storage(format!(
                "unknown reservation state {other}"
            ))),
        }
    }
}

/// Funds debited for an order, reversible until captured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Entry ID of the purchase debit
    pub reservation_id: i64,
    pub user_id: UserId,
    pub order_reference: String,
    pub amount: Amount,
    pub state: ReservationState,
    pub release_entry_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn token(&self) -> ReservationToken {
        ReservationToken {
            reservation_id: self.reservation_id,
            user_id: self.user_id,
            order_reference: self.order_reference.clone(),
        }
    }
}

/// Handle returned by `reserve` and passed back to `capture` / `release`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReservationToken {
    pub reservation_id: i64,
    pub user_id: UserId,
    pub order_reference: String,
}

/// Result of recomputing an account from its entries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub user_id: UserId,
    pub balance: Amount,
    pub entry_sum: Amount,
    pub consistent: bool,
}

/// Render minor units as a decimal string, e.g. `12345` with 2 decimals is `"123.45"`.
pub fn format_amount(amount: Amount, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = 10_u64.pow(decimals);
    let sign = if amount < 0 { "-" } else { "" };
    let magnitude = amount.unsigned_abs();
    format!(
        "{sign}{}.{:0width$}",
        magnitude / scale,
        magnitude % scale,
        width = decimals as usize
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount() {
        assert_eq!(format_amount(12345, 2), "123.45");
        assert_eq!(format_amount(5, 2), "0.05");
        assert_eq!(format_amount(-250, 2), "-2.50");
        assert_eq!(format_amount(700, 0), "700");
        assert_eq!(format_amount(1, 3), "0.001");
        assert_eq!(format_amount(i64::MIN, 2), "-92233720368547758.08");
    }

    #[test]
    fn test_entry_kind_string_round_trip() {
        for kind in [
            EntryKind::Purchase,
            EntryKind::Refund,
            EntryKind::AdminAdjustment,
            EntryKind::Correction,
            EntryKind::Release,
        ] {
            assert_eq!(kind.to_string().parse::<EntryKind>().unwrap(), kind);
        }
        assert!("bonus".parse::<EntryKind>().is_err());
    }

    #[test]
    fn test_reservation_token_mirrors_reservation() {
        let now = Utc::now();
        let reservation = Reservation {
            reservation_id: 11,
            user_id: 4,
            order_reference: "order-42".to_string(),
            amount: 100,
            state: ReservationState::Reserved,
            release_entry_id: None,
            created_at: now,
            updated_at: now,
        };
        let token = reservation.token();
        assert_eq!(token.reservation_id, 11);
        assert_eq!(token.user_id, 4);
        assert_eq!(token.order_reference, "order-42");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!ReservationState::Reserved.is_terminal());
        assert!(ReservationState::Captured.is_terminal());
        assert!(ReservationState::Released.is_terminal());
    }

    #[test]
    fn test_credit_reason_maps_to_entry_kind() {
        assert_eq!(EntryKind::from(CreditReason::Refund), EntryKind::Refund);
        assert_eq!(
            EntryKind::from(AdjustmentReason::Correction),
            EntryKind::Correction
        );
    }
}
