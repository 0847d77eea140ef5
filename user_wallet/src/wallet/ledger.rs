//! Wallet ledger: atomic debit, credit and balance inquiry per user.
//!
//! Every mutation runs under the account's in-process lock and commits with an
//! optimistic version check at the store, retried a bounded number of times.
//! Reads go straight to the store and never wait on the lock.

use std::future::Future;
use std::sync::Arc;

use super::{
    config::LedgerConfig,
    errors::{WalletError, WalletResult},
    locks::AccountLocks,
    models::{
        Account, AccountStatus, AdjustmentReason, Amount, AuditReport, CreditReason, EntryKind,
        LedgerEntry, Reservation, ReservationState, ReservationToken, UserId,
    },
};
use crate::db::{Commit, CommitReceipt, CommitStatus, LedgerStore, NewEntry, ReservationWrite};

/// Largest page returned by [`WalletLedger::entries`]
pub const MAX_ENTRY_PAGE: i64 = 1000;

/// Outcome of one optimistic attempt
enum Step<T> {
    Done(T),
    Retry,
}

/// Wallet ledger
pub struct WalletLedger {
    store: Arc<dyn LedgerStore>,
    locks: AccountLocks,
    config: LedgerConfig,
}

impl WalletLedger {
    /// Create a ledger over `store` with default settings
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self::with_config(store, LedgerConfig::default())
    }

    pub fn with_config(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            locks: AccountLocks::default(),
            config,
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Current committed balance. Users that never transacted have a balance of 0.
    pub async fn get_balance(&self, user_id: UserId) -> WalletResult<Amount> {
        Ok(self.load(user_id).await?.balance)
    }

    /// Full account snapshot, or an empty one for unseen users
    pub async fn account(&self, user_id: UserId) -> WalletResult<Account> {
        self.load(user_id).await
    }

    /// Side-effect free `balance >= amount` check.
    ///
    /// The answer may be stale by the time the caller acts on it; `reserve`
    /// re-checks atomically.
    pub async fn is_sufficient(&self, user_id: UserId, amount: Amount) -> WalletResult<bool> {
        if amount < 0 {
            return Err(WalletError::InvalidAmount(amount));
        }
        Ok(self.get_balance(user_id).await? >= amount)
    }

    /// Debit `amount` for an order, provided the balance covers it.
    ///
    /// Calling again with the same `order_reference` returns the original
    /// reservation and debits nothing.
    ///
    /// # Errors
    ///
    /// * `WalletError::InvalidAmount` - `amount` is not positive
    /// * `WalletError::InsufficientFunds` - balance is below `amount`
    /// * `WalletError::AccountDisabled` - account is soft-disabled
    /// * `WalletError::ConcurrencyConflict` - retries exhausted
    pub async fn reserve(
        &self,
        user_id: UserId,
        amount: Amount,
        order_reference: &str,
    ) -> WalletResult<Reservation> {
        validate_amount(amount)?;
        self.validate_reference(order_reference)?;

        self.with_account(user_id, move || {
            self.try_reserve(user_id, amount, order_reference)
        })
        .await
    }

    /// Mark a reservation as captured; the debit stands for good.
    ///
    /// Capturing twice is a no-op. Capturing a released reservation fails with
    /// `InvalidStateTransition`.
    pub async fn capture(&self, token: &ReservationToken) -> WalletResult<Reservation> {
        self.with_account(token.user_id, move || {
            self.try_transition(token, ReservationState::Captured)
        })
        .await
    }

    /// Return reserved funds with an offsetting credit.
    ///
    /// Releasing twice is a no-op. Releasing a captured reservation fails with
    /// `InvalidStateTransition`.
    pub async fn release(&self, token: &ReservationToken) -> WalletResult<Reservation> {
        self.with_account(token.user_id, move || {
            self.try_transition(token, ReservationState::Released)
        })
        .await
    }

    /// Add funds. With a `reference`, a repeated call returns the original entry.
    pub async fn credit(
        &self,
        user_id: UserId,
        amount: Amount,
        reason: CreditReason,
        reference: Option<&str>,
    ) -> WalletResult<LedgerEntry> {
        validate_amount(amount)?;
        if let Some(reference) = reference {
            self.validate_reference(reference)?;
        }

        let kind = EntryKind::from(reason);
        self.with_account(user_id, move || {
            self.try_post(user_id, amount, kind, reference)
        })
        .await
    }

    /// Remove funds outside of checkout (admin adjustments and corrections).
    /// Never takes the balance below zero.
    pub async fn debit_adjustment(
        &self,
        user_id: UserId,
        amount: Amount,
        reason: AdjustmentReason,
        reference: Option<&str>,
    ) -> WalletResult<LedgerEntry> {
        validate_amount(amount)?;
        if let Some(reference) = reference {
            self.validate_reference(reference)?;
        }

        let kind = EntryKind::from(reason);
        self.with_account(user_id, move || {
            self.try_post(user_id, -amount, kind, reference)
        })
        .await
    }

    /// Bring the balance to `target` with a single admin adjustment entry.
    ///
    /// Returns `None` when the balance already equals `target`.
    pub async fn set_balance(
        &self,
        user_id: UserId,
        target: Amount,
        reference: Option<&str>,
    ) -> WalletResult<Option<LedgerEntry>> {
        if target < 0 {
            return Err(WalletError::InvalidAmount(target));
        }
        if let Some(reference) = reference {
            self.validate_reference(reference)?;
        }

        self.with_account(user_id, move || {
            self.try_set_balance(user_id, target, reference)
        })
        .await
    }

    /// Soft-disable an account. New reservations and debits are refused;
    /// credits, captures and releases still apply.
    pub async fn disable_account(&self, user_id: UserId) -> WalletResult<Account> {
        self.with_account(user_id, move || {
            self.try_set_status(user_id, AccountStatus::Disabled)
        })
        .await
    }

    pub async fn enable_account(&self, user_id: UserId) -> WalletResult<Account> {
        self.with_account(user_id, move || {
            self.try_set_status(user_id, AccountStatus::Active)
        })
        .await
    }

    /// Newest-first ledger entries
    pub async fn entries(&self, user_id: UserId, limit: i64) -> WalletResult<Vec<LedgerEntry>> {
        self.store
            .list_entries(user_id, limit.clamp(1, MAX_ENTRY_PAGE))
            .await
    }

    pub async fn reservation(
        &self,
        user_id: UserId,
        order_reference: &str,
    ) -> WalletResult<Option<Reservation>> {
        self.store.find_reservation(user_id, order_reference).await
    }

    /// Recompute the balance from the entry log and compare.
    pub async fn audit(&self, user_id: UserId) -> WalletResult<AuditReport> {
        // Hold the lock so no local mutation lands between the two reads
        let _guard = self.lock(user_id).await?;
        let balance = self.get_balance(user_id).await?;
        let entry_sum = self.store.entry_sum(user_id).await?;

        let consistent = balance == entry_sum;
        if !consistent {
            log::error!(
                "Ledger mismatch on account {}: balance {} but entries sum to {}",
                user_id,
                balance,
                entry_sum
            );
        }

        Ok(AuditReport {
            user_id,
            balance,
            entry_sum,
            consistent,
        })
    }

    async fn load(&self, user_id: UserId) -> WalletResult<Account> {
        Ok(self
            .store
            .load_account(user_id)
            .await?
            .unwrap_or_else(|| Account::empty(user_id)))
    }

    async fn lock(&self, user_id: UserId) -> WalletResult<tokio::sync::OwnedMutexGuard<()>> {
        self.locks
            .acquire(user_id, self.config.lock_timeout)
            .await
            .ok_or_else(|| {
                log::warn!(
                    "Timed out after {:?} waiting for account {} lock",
                    self.config.lock_timeout,
                    user_id
                );
                WalletError::LockTimeout {
                    user_id,
                    waited: self.config.lock_timeout,
                }
            })
    }

    /// Run `attempt` under the account lock until it commits or attempts run out.
    async fn with_account<T, F, Fut>(&self, user_id: UserId, mut attempt: F) -> WalletResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = WalletResult<Step<T>>>,
    {
        let _guard = self.lock(user_id).await?;
        let max_attempts = self.config.max_commit_attempts.max(1);

        for n in 1..=max_attempts {
            match attempt().await? {
                Step::Done(value) => return Ok(value),
                Step::Retry => log::warn!(
                    "Commit conflict on account {} (attempt {}/{})",
                    user_id,
                    n,
                    max_attempts
                ),
            }
        }

        log::error!(
            "Giving up on account {} after {} conflicting commits",
            user_id,
            max_attempts
        );
        Err(WalletError::ConcurrencyConflict {
            user_id,
            attempts: max_attempts,
        })
    }

    async fn commit(&self, commit: Commit) -> WalletResult<Option<CommitReceipt>> {
        match self.store.commit(commit).await? {
            CommitStatus::Committed(receipt) => Ok(Some(receipt)),
            CommitStatus::Conflict => Ok(None),
        }
    }

    async fn try_reserve(
        &self,
        user_id: UserId,
        amount: Amount,
        order_reference: &str,
    ) -> WalletResult<Step<Reservation>> {
        if let Some(existing) = self.store.find_reservation(user_id, order_reference).await? {
            if existing.amount != amount {
                log::warn!(
                    "Replay of order {} on account {} asked for {} but reservation holds {}",
                    order_reference,
                    user_id,
                    amount,
                    existing.amount
                );
            }
            log::info!(
                "Reservation for order {} on account {} already exists ({})",
                order_reference,
                user_id,
                existing.state
            );
            return Ok(Step::Done(existing));
        }

        let account = self.load(user_id).await?;
        if !account.is_active() {
            return Err(WalletError::AccountDisabled(user_id));
        }
        if account.balance < amount {
            log::info!(
                "Declined order {} on account {}: balance {} below {}",
                order_reference,
                user_id,
                account.balance,
                amount
            );
            return Err(WalletError::InsufficientFunds {
                user_id,
                available: account.balance,
                required: amount,
            });
        }

        let commit = Commit {
            user_id,
            expected_version: account.version,
            balance: account.balance - amount,
            status: account.status,
            entry: Some(NewEntry {
                amount: -amount,
                kind: EntryKind::Purchase,
                order_reference: Some(order_reference.to_string()),
                description: Some(format!("Payment for order {order_reference}")),
            }),
            reservation: Some(ReservationWrite::Open {
                order_reference: order_reference.to_string(),
                amount,
            }),
        };

        let Some(receipt) = self.commit(commit).await? else {
            return Ok(Step::Retry);
        };
        let reservation = receipt
            .reservation
            .ok_or_else(|| WalletError::Storage("commit returned no reservation".to_string()))?;

        log::info!(
            "Reserved {} for order {} on account {} (balance {})",
            amount,
            order_reference,
            user_id,
            receipt.account.balance
        );
        Ok(Step::Done(reservation))
    }

    async fn try_transition(
        &self,
        token: &ReservationToken,
        to: ReservationState,
    ) -> WalletResult<Step<Reservation>> {
        let reservation = self
            .store
            .find_reservation(token.user_id, &token.order_reference)
            .await?
            .filter(|r| r.reservation_id == token.reservation_id)
            .ok_or_else(|| WalletError::ReservationNotFound(token.order_reference.clone()))?;

        if reservation.state == to {
            log::debug!(
                "Reservation {} for order {} is already {}",
                reservation.reservation_id,
                reservation.order_reference,
                to
            );
            return Ok(Step::Done(reservation));
        }
        if reservation.state.is_terminal() {
            return Err(WalletError::InvalidStateTransition {
                from: reservation.state,
                to,
            });
        }

        let account = self.load(token.user_id).await?;
        let (balance, entry) = match to {
            ReservationState::Released => {
                let balance = account
                    .balance
                    .checked_add(reservation.amount)
                    .ok_or(WalletError::BalanceOverflow)?;
                let entry = NewEntry {
                    amount: reservation.amount,
                    kind: EntryKind::Release,
                    order_reference: Some(reservation.order_reference.clone()),
                    description: Some(format!(
                        "Released payment for order {}",
                        reservation.order_reference
                    )),
                };
                (balance, Some(entry))
            }
            ReservationState::Captured => (account.balance, None),
            ReservationState::Reserved => {
                return Err(WalletError::InvalidStateTransition {
                    from: reservation.state,
                    to,
                });
            }
        };

        let commit = Commit {
            user_id: token.user_id,
            expected_version: account.version,
            balance,
            status: account.status,
            entry,
            reservation: Some(ReservationWrite::Transition {
                reservation_id: reservation.reservation_id,
                from: reservation.state,
                to,
            }),
        };

        let Some(receipt) = self.commit(commit).await? else {
            return Ok(Step::Retry);
        };
        let updated = receipt
            .reservation
            .ok_or_else(|| WalletError::Storage("commit returned no reservation".to_string()))?;

        log::info!(
            "Reservation {} for order {} on account {} is now {} (balance {})",
            updated.reservation_id,
            updated.order_reference,
            updated.user_id,
            updated.state,
            receipt.account.balance
        );
        Ok(Step::Done(updated))
    }

    /// Post a signed amount as a standalone entry
    async fn try_post(
        &self,
        user_id: UserId,
        amount: Amount,
        kind: EntryKind,
        reference: Option<&str>,
    ) -> WalletResult<Step<LedgerEntry>> {
        if let Some(reference) = reference
            && let Some(existing) = self.store.find_entry(user_id, reference, kind).await?
        {
            if existing.amount != amount {
                log::warn!(
                    "Reference {} on account {} already posted {} {}, refusing {}",
                    reference,
                    user_id,
                    kind,
                    existing.amount,
                    amount
                );
                return Err(WalletError::IdempotencyMismatch {
                    reference: reference.to_string(),
                    recorded: existing.amount,
                    requested: amount,
                });
            }
            log::info!(
                "Entry {} for {} {} on account {} already recorded",
                existing.entry_id,
                kind,
                reference,
                user_id
            );
            return Ok(Step::Done(existing));
        }

        let account = self.load(user_id).await?;
        let balance = if amount < 0 {
            if !account.is_active() {
                return Err(WalletError::AccountDisabled(user_id));
            }
            if account.balance < -amount {
                return Err(WalletError::InsufficientFunds {
                    user_id,
                    available: account.balance,
                    required: -amount,
                });
            }
            account.balance + amount
        } else {
            account
                .balance
                .checked_add(amount)
                .ok_or(WalletError::BalanceOverflow)?
        };

        let commit = Commit {
            user_id,
            expected_version: account.version,
            balance,
            status: account.status,
            entry: Some(NewEntry {
                amount,
                kind,
                order_reference: reference.map(str::to_string),
                description: None,
            }),
            reservation: None,
        };

        let Some(receipt) = self.commit(commit).await? else {
            return Ok(Step::Retry);
        };
        let entry = receipt
            .entry
            .ok_or_else(|| WalletError::Storage("commit returned no entry".to_string()))?;

        log::info!(
            "Posted {} {} on account {} (balance {})",
            kind,
            amount,
            user_id,
            entry.balance_after
        );
        Ok(Step::Done(entry))
    }

    async fn try_set_balance(
        &self,
        user_id: UserId,
        target: Amount,
        reference: Option<&str>,
    ) -> WalletResult<Step<Option<LedgerEntry>>> {
        if let Some(reference) = reference
            && let Some(existing) = self
                .store
                .find_entry(user_id, reference, EntryKind::AdminAdjustment)
                .await?
        {
            // Only a balance set to the same target counts as a replay
            let description = set_balance_description(target);
            if existing.description.as_deref() != Some(description.as_str()) {
                log::warn!(
                    "Reference {} on account {} already used by entry {}, refusing balance {}",
                    reference,
                    user_id,
                    existing.entry_id,
                    target
                );
                return Err(WalletError::IdempotencyMismatch {
                    reference: reference.to_string(),
                    recorded: existing.balance_after,
                    requested: target,
                });
            }
            return Ok(Step::Done(Some(existing)));
        }

        let account = self.load(user_id).await?;
        let delta = target
            .checked_sub(account.balance)
            .ok_or(WalletError::BalanceOverflow)?;
        if delta == 0 {
            return Ok(Step::Done(None));
        }

        let commit = Commit {
            user_id,
            expected_version: account.version,
            balance: target,
            status: account.status,
            entry: Some(NewEntry {
                amount: delta,
                kind: EntryKind::AdminAdjustment,
                order_reference: reference.map(str::to_string),
                description: Some(set_balance_description(target)),
            }),
            reservation: None,
        };

        let Some(receipt) = self.commit(commit).await? else {
            return Ok(Step::Retry);
        };

        log::info!(
            "Balance of account {} set from {} to {}",
            user_id,
            account.balance,
            target
        );
        Ok(Step::Done(receipt.entry))
    }

    async fn try_set_status(
        &self,
        user_id: UserId,
        status: AccountStatus,
    ) -> WalletResult<Step<Account>> {
        let account = self.load(user_id).await?;
        if account.status == status {
            return Ok(Step::Done(account));
        }

        let commit = Commit {
            user_id,
            expected_version: account.version,
            balance: account.balance,
            status,
            entry: None,
            reservation: None,
        };

        let Some(receipt) = self.commit(commit).await? else {
            return Ok(Step::Retry);
        };

        log::info!("Account {} is now {}", user_id, status);
        Ok(Step::Done(receipt.account))
    }

    fn validate_reference(&self, reference: &str) -> WalletResult<()> {
        let trimmed = reference.trim();
        if trimmed.is_empty()
            || trimmed.len() != reference.len()
            || reference.len() > self.config.max_reference_len
        {
            return Err(WalletError::InvalidReference(reference.to_string()));
        }
        Ok(())
    }
}

fn set_balance_description(target: Amount) -> String {
    format!("Balance set to {target}")
}

fn validate_amount(amount: Amount) -> WalletResult<()> {
    if amount <= 0 {
        return Err(WalletError::InvalidAmount(amount));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryLedgerStore;

    fn ledger() -> (WalletLedger, Arc<MemoryLedgerStore>) {
        let store = Arc::new(MemoryLedgerStore::new());
        (WalletLedger::new(store.clone()), store)
    }

    async fn funded(balance: Amount) -> (WalletLedger, Arc<MemoryLedgerStore>) {
        let (ledger, store) = ledger();
        ledger
            .credit(1, balance, CreditReason::AdminAdjustment, Some("seed"))
            .await
            .unwrap();
        (ledger, store)
    }

    #[tokio::test]
    async fn test_unknown_user_has_zero_balance() {
        let (ledger, store) = ledger();
        assert_eq!(ledger.get_balance(404).await.unwrap(), 0);
        assert!(ledger.is_sufficient(404, 0).await.unwrap());
        assert!(!ledger.is_sufficient(404, 1).await.unwrap());
        assert_eq!(store.commit_attempts(), 0, "reads must not write");
    }

    #[tokio::test]
    async fn test_non_positive_amounts_rejected_before_storage() {
        let (ledger, store) = ledger();
        assert!(matches!(
            ledger.reserve(1, 0, "o1").await,
            Err(WalletError::InvalidAmount(0))
        ));
        assert!(matches!(
            ledger.credit(1, -5, CreditReason::Refund, None).await,
            Err(WalletError::InvalidAmount(-5))
        ));
        assert!(matches!(
            ledger.is_sufficient(1, -1).await,
            Err(WalletError::InvalidAmount(-1))
        ));
        assert_eq!(store.commit_attempts(), 0);
    }

    #[tokio::test]
    async fn test_invalid_references() {
        let (ledger, _) = funded(100).await;
        let too_long = "x".repeat(129);
        for reference in ["", "   ", " padded", too_long.as_str()] {
            assert!(matches!(
                ledger.reserve(1, 10, reference).await,
                Err(WalletError::InvalidReference(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_reserve_debits_and_records_purchase() {
        let (ledger, _) = funded(5000).await;
        let reservation = ledger.reserve(1, 3000, "o1").await.unwrap();

        assert_eq!(reservation.state, ReservationState::Reserved);
        assert_eq!(reservation.amount, 3000);
        assert_eq!(ledger.get_balance(1).await.unwrap(), 2000);

        let entries = ledger.entries(1, 10).await.unwrap();
        assert_eq!(entries[0].kind, EntryKind::Purchase);
        assert_eq!(entries[0].amount, -3000);
        assert_eq!(entries[0].entry_id, reservation.reservation_id);
        assert_eq!(entries[0].order_reference.as_deref(), Some("o1"));
    }

    #[tokio::test]
    async fn test_reserve_is_idempotent_per_order() {
        let (ledger, _) = funded(1000).await;
        let first = ledger.reserve(1, 100, "order-42").await.unwrap();
        let second = ledger.reserve(1, 100, "order-42").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(ledger.get_balance(1).await.unwrap(), 900);
        let purchases = ledger
            .entries(1, 100)
            .await
            .unwrap()
            .into_iter()
            .filter(|e| e.kind == EntryKind::Purchase)
            .count();
        assert_eq!(purchases, 1);
    }

    #[tokio::test]
    async fn test_same_order_reference_is_scoped_per_user() {
        let (ledger, _) = funded(1000).await;
        ledger
            .credit(2, 1000, CreditReason::AdminAdjustment, None)
            .await
            .unwrap();

        ledger.reserve(1, 100, "shared").await.unwrap();
        ledger.reserve(2, 100, "shared").await.unwrap();
        assert_eq!(ledger.get_balance(1).await.unwrap(), 900);
        assert_eq!(ledger.get_balance(2).await.unwrap(), 900);
    }

    #[tokio::test]
    async fn test_insufficient_funds_leaves_balance() {
        let (ledger, _) = funded(100).await;
        let err = ledger.reserve(1, 101, "o1").await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::InsufficientFunds {
                available: 100,
                required: 101,
                ..
            }
        ));
        assert!(err.is_user_facing());
        assert_eq!(ledger.get_balance(1).await.unwrap(), 100);
        assert!(ledger.reservation(1, "o1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let (ledger, _) = funded(500).await;
        let token = ledger.reserve(1, 200, "o1").await.unwrap().token();

        let released = ledger.release(&token).await.unwrap();
        assert_eq!(released.state, ReservationState::Released);
        assert!(released.release_entry_id.is_some());
        assert_eq!(ledger.get_balance(1).await.unwrap(), 500);

        let again = ledger.release(&token).await.unwrap();
        assert_eq!(again, released);
        assert_eq!(ledger.get_balance(1).await.unwrap(), 500);
        assert_eq!(ledger.entries(1, 10).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_capture_then_release_is_rejected() {
        let (ledger, _) = funded(500).await;
        let token = ledger.reserve(1, 200, "o1").await.unwrap().token();

        let captured = ledger.capture(&token).await.unwrap();
        assert_eq!(captured.state, ReservationState::Captured);
        assert_eq!(ledger.capture(&token).await.unwrap(), captured);

        let err = ledger.release(&token).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::InvalidStateTransition {
                from: ReservationState::Captured,
                to: ReservationState::Released
            }
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), 300);
    }

    #[tokio::test]
    async fn test_release_then_capture_is_rejected() {
        let (ledger, _) = funded(500).await;
        let token = ledger.reserve(1, 200, "o1").await.unwrap().token();
        ledger.release(&token).await.unwrap();

        assert!(matches!(
            ledger.capture(&token).await,
            Err(WalletError::InvalidStateTransition {
                from: ReservationState::Released,
                to: ReservationState::Captured
            })
        ));
    }

    #[tokio::test]
    async fn test_replay_after_release_returns_released_reservation() {
        let (ledger, _) = funded(500).await;
        let token = ledger.reserve(1, 200, "o1").await.unwrap().token();
        ledger.release(&token).await.unwrap();

        let replay = ledger.reserve(1, 200, "o1").await.unwrap();
        assert_eq!(replay.state, ReservationState::Released);
        assert_eq!(ledger.get_balance(1).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_unknown_token_is_not_found() {
        let (ledger, _) = funded(500).await;
        let mut token = ledger.reserve(1, 200, "o1").await.unwrap().token();
        token.reservation_id += 100;

        assert!(matches!(
            ledger.release(&token).await,
            Err(WalletError::ReservationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_credit_with_reference_is_idempotent() {
        let (ledger, _) = ledger();
        let first = ledger
            .credit(1, 1000, CreditReason::Refund, Some("o3"))
            .await
            .unwrap();
        let second = ledger
            .credit(1, 1000, CreditReason::Refund, Some("o3"))
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(ledger.get_balance(1).await.unwrap(), 1000);

        // Without a reference every call posts
        ledger.credit(1, 5, CreditReason::Correction, None).await.unwrap();
        ledger.credit(1, 5, CreditReason::Correction, None).await.unwrap();
        assert_eq!(ledger.get_balance(1).await.unwrap(), 1010);
    }

    #[tokio::test]
    async fn test_credit_overflow() {
        let (ledger, _) = ledger();
        ledger
            .credit(1, i64::MAX, CreditReason::AdminAdjustment, None)
            .await
            .unwrap();
        assert!(matches!(
            ledger.credit(1, 1, CreditReason::Refund, None).await,
            Err(WalletError::BalanceOverflow)
        ));
    }

    #[tokio::test]
    async fn test_debit_adjustment_never_goes_negative() {
        let (ledger, _) = funded(100).await;
        let entry = ledger
            .debit_adjustment(1, 40, AdjustmentReason::Correction, Some("fix-1"))
            .await
            .unwrap();
        assert_eq!(entry.amount, -40);
        assert_eq!(entry.balance_after, 60);

        assert!(matches!(
            ledger
                .debit_adjustment(1, 61, AdjustmentReason::AdminAdjustment, None)
                .await,
            Err(WalletError::InsufficientFunds { .. })
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), 60);
    }

    #[tokio::test]
    async fn test_set_balance_writes_delta() {
        let (ledger, _) = funded(100).await;
        let up = ledger.set_balance(1, 250, None).await.unwrap().unwrap();
        assert_eq!(up.amount, 150);
        assert_eq!(up.kind, EntryKind::AdminAdjustment);

        let down = ledger.set_balance(1, 20, None).await.unwrap().unwrap();
        assert_eq!(down.amount, -230);
        assert!(ledger.set_balance(1, 20, None).await.unwrap().is_none());
        assert!(matches!(
            ledger.set_balance(1, -1, None).await,
            Err(WalletError::InvalidAmount(-1))
        ));
        assert!(ledger.audit(1).await.unwrap().consistent);
    }

    #[tokio::test]
    async fn test_debit_reusing_credit_reference_is_refused() {
        let (ledger, _) = ledger();
        ledger
            .credit(1, 500, CreditReason::AdminAdjustment, Some("adj-7"))
            .await
            .unwrap();

        let err = ledger
            .debit_adjustment(1, 200, AdjustmentReason::AdminAdjustment, Some("adj-7"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WalletError::IdempotencyMismatch {
                recorded: 500,
                requested: -200,
                ..
            }
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), 500);

        // Same for corrections, which share an entry kind in both directions
        ledger
            .credit(1, 30, CreditReason::Correction, Some("fix-2"))
            .await
            .unwrap();
        assert!(matches!(
            ledger
                .debit_adjustment(1, 30, AdjustmentReason::Correction, Some("fix-2"))
                .await,
            Err(WalletError::IdempotencyMismatch { .. })
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), 530);
    }

    #[tokio::test]
    async fn test_credit_replay_with_different_amount_is_refused() {
        let (ledger, _) = ledger();
        ledger
            .credit(1, 1000, CreditReason::Refund, Some("o3"))
            .await
            .unwrap();
        assert!(matches!(
            ledger.credit(1, 400, CreditReason::Refund, Some("o3")).await,
            Err(WalletError::IdempotencyMismatch {
                recorded: 1000,
                requested: 400,
                ..
            })
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn test_set_balance_reference_replay() {
        let (ledger, _) = funded(100).await;
        let first = ledger
            .set_balance(1, 250, Some("ticket-1"))
            .await
            .unwrap()
            .unwrap();
        ledger.reserve(1, 50, "o1").await.unwrap();

        // Replaying the same target returns the original entry and writes nothing
        let replay = ledger
            .set_balance(1, 250, Some("ticket-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(replay, first);
        assert_eq!(ledger.get_balance(1).await.unwrap(), 200);

        assert!(matches!(
            ledger.set_balance(1, 80, Some("ticket-1")).await,
            Err(WalletError::IdempotencyMismatch {
                recorded: 250,
                requested: 80,
                ..
            })
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_set_balance_reusing_credit_reference_is_refused() {
        let (ledger, _) = ledger();
        ledger
            .credit(1, 500, CreditReason::AdminAdjustment, Some("ticket-9"))
            .await
            .unwrap();

        assert!(matches!(
            ledger.set_balance(1, 50, Some("ticket-9")).await,
            Err(WalletError::IdempotencyMismatch { .. })
        ));
        // Even when the target happens to equal the credit's resulting balance
        assert!(matches!(
            ledger.set_balance(1, 500, Some("ticket-9")).await,
            Err(WalletError::IdempotencyMismatch { .. })
        ));
        assert_eq!(ledger.get_balance(1).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_lock_timeout_is_reported_separately() {
        let store = Arc::new(MemoryLedgerStore::new());
        let ledger = WalletLedger::with_config(
            store,
            LedgerConfig {
                lock_timeout: std::time::Duration::from_millis(20),
                ..LedgerConfig::default()
            },
        );

        let _held = ledger.lock(1).await.unwrap();
        let err = ledger
            .credit(1, 10, CreditReason::Refund, None)
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::LockTimeout { user_id: 1, .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_disabled_account_refuses_debits_only() {
        let (ledger, _) = funded(500).await;
        let token = ledger.reserve(1, 100, "o1").await.unwrap().token();

        let account = ledger.disable_account(1).await.unwrap();
        assert_eq!(account.status, AccountStatus::Disabled);

        assert!(matches!(
            ledger.reserve(1, 10, "o2").await,
            Err(WalletError::AccountDisabled(1))
        ));
        // Unwinding and refunds still land
        ledger.release(&token).await.unwrap();
        ledger
            .credit(1, 10, CreditReason::Refund, Some("o0"))
            .await
            .unwrap();
        assert_eq!(ledger.get_balance(1).await.unwrap(), 510);

        ledger.enable_account(1).await.unwrap();
        ledger.reserve(1, 10, "o2").await.unwrap();
    }

    #[tokio::test]
    async fn test_storage_failure_changes_nothing() {
        let (ledger, store) = funded(500).await;
        store.fail_next_commit();

        let err = ledger.reserve(1, 100, "o1").await.unwrap_err();
        assert!(matches!(err, WalletError::Storage(_)));
        assert!(!err.is_user_facing());
        assert_eq!(ledger.get_balance(1).await.unwrap(), 500);
        assert!(ledger.reservation(1, "o1").await.unwrap().is_none());
        assert!(ledger.audit(1).await.unwrap().consistent);

        // A retry by the caller succeeds
        ledger.reserve(1, 100, "o1").await.unwrap();
        assert_eq!(ledger.get_balance(1).await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_conflicts_are_retried_then_surfaced() {
        let (ledger, store) = funded(500).await;

        store.inject_conflicts(2);
        ledger.reserve(1, 100, "o1").await.unwrap();
        assert_eq!(ledger.get_balance(1).await.unwrap(), 400);

        store.inject_conflicts(3);
        let err = ledger.reserve(1, 100, "o2").await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::ConcurrencyConflict { attempts: 3, .. }
        ));
        assert!(err.is_transient());
        assert_eq!(ledger.get_balance(1).await.unwrap(), 400);
    }

    #[tokio::test]
    async fn test_audit_matches_entries() {
        let (ledger, _) = funded(5000).await;
        let token = ledger.reserve(1, 3000, "o1").await.unwrap().token();
        let _ = ledger.reserve(1, 3000, "o2").await;
        ledger.release(&token).await.unwrap();
        ledger
            .credit(1, 1000, CreditReason::Refund, Some("o3"))
            .await
            .unwrap();

        let report = ledger.audit(1).await.unwrap();
        assert_eq!(report.balance, 6000);
        assert_eq!(report.entry_sum, 6000);
        assert!(report.consistent);
    }
}
