//! Ledger tuning knobs.

use std::time::Duration;

use crate::db::config::parse_env_or;

/// Ledger configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Optimistic commit attempts before giving up with `ConcurrencyConflict`
    pub max_commit_attempts: u32,

    /// Longest wait for the per-account mutation lock
    pub lock_timeout: Duration,

    /// Longest accepted order reference
    pub max_reference_len: usize,
}

impl LedgerConfig {
    /// Create configuration from environment variables
    ///
    /// - `LEDGER_MAX_COMMIT_ATTEMPTS` (default: 3)
    /// - `LEDGER_LOCK_TIMEOUT_MS` (default: 5000)
    /// - `LEDGER_MAX_REFERENCE_LEN` (default: 128)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_commit_attempts: parse_env_or(
                "LEDGER_MAX_COMMIT_ATTEMPTS",
                defaults.max_commit_attempts,
            )
            .max(1),
            lock_timeout: Duration::from_millis(parse_env_or(
                "LEDGER_LOCK_TIMEOUT_MS",
                defaults.lock_timeout.as_millis() as u64,
            )),
            max_reference_len: parse_env_or("LEDGER_MAX_REFERENCE_LEN", defaults.max_reference_len),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 3,
            lock_timeout: Duration::from_secs(5),
            max_reference_len: 128,
        }
    }
}
