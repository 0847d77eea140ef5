//! Wallet module providing the per-user balance ledger.
//!
//! This module implements:
//! - Append-only ledger entries for every balance change
//! - Check-then-debit reservations serialized per account
//! - Idempotent reserve, release and referenced credits
//! - Reservation lifecycle `Reserved -> Captured | Released`
//! - Soft-disabling of accounts
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use user_wallet::db::MemoryLedgerStore;
//! use user_wallet::wallet::{CreditReason, WalletLedger};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = WalletLedger::new(Arc::new(MemoryLedgerStore::new()));
//!
//! ledger.credit(7, 5000, CreditReason::AdminAdjustment, None).await?;
//! let reservation = ledger.reserve(7, 3000, "order-1001").await?;
//! assert_eq!(ledger.get_balance(7).await?, 2000);
//!
//! // Order failed downstream: hand the money back
//! ledger.release(&reservation.token()).await?;
//! assert_eq!(ledger.get_balance(7).await?, 5000);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod ledger;
mod locks;
pub mod models;

pub use config::LedgerConfig;
pub use errors::{WalletError, WalletResult};
pub use ledger::WalletLedger;
pub use models::{
    Account, AccountStatus, AdjustmentReason, Amount, AuditReport, CreditReason, EntryKind,
    LedgerEntry, Reservation, ReservationState, ReservationToken, UserId, format_amount,
};
