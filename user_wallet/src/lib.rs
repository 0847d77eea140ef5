//! # User Wallet
//!
//! A wallet-balance ledger that lets shoppers pay with stored credit.
//!
//! Balances are integer minor units. Every change is an immutable ledger
//! entry, and an account's balance always equals the sum of its entries.
//! Checkout debits go through reservations that are checked and debited
//! atomically per account, so two concurrent checkouts cannot both spend
//! the same money.
//!
//! ## Core Modules
//!
//! - [`wallet`]: the [`WalletLedger`] and its data model
//! - [`db`]: ledger storage (PostgreSQL and in-memory)
//! - [`checkout`]: the [`WalletGateway`] a checkout orchestrator talks to
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use user_wallet::{MemoryLedgerStore, WalletLedger};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), user_wallet::WalletError> {
//! let ledger = WalletLedger::new(Arc::new(MemoryLedgerStore::new()));
//! assert_eq!(ledger.get_balance(42).await?, 0);
//! # Ok(())
//! # }
//! ```

/// Checkout gateway over the ledger.
pub mod checkout;

/// Storage backends.
pub mod db;

/// Ledger core.
pub mod wallet;

pub use checkout::{CheckoutError, GatewaySettings, WalletGateway};
pub use db::{Database, DatabaseConfig, LedgerStore, MemoryLedgerStore, PgLedgerStore};
pub use wallet::{LedgerConfig, WalletError, WalletLedger, WalletResult};
