//! In-memory ledger store for tests and development.
//!
//! Holds every account, entry and reservation behind one mutex, so each
//! commit is trivially atomic. Fault injection hooks let tests drive the
//! ledger through storage failures and optimistic-lock conflicts.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::repository::{Commit, CommitReceipt, CommitStatus, LedgerStore, ReservationWrite};
use crate::wallet::{
    Account, Amount, EntryKind, LedgerEntry, Reservation, ReservationState, UserId, WalletError,
    WalletResult,
};

#[derive(Default)]
struct MemoryState {
    accounts: HashMap<UserId, Account>,
    entries: HashMap<UserId, Vec<LedgerEntry>>,
    reservations: HashMap<(UserId, String), Reservation>,
    last_entry_id: i64,
}

/// In-memory implementation of `LedgerStore`
#[derive(Default)]
pub struct MemoryLedgerStore {
    state: Mutex<MemoryState>,
    fail_next_commit: AtomicBool,
    pending_conflicts: AtomicU32,
    commits: AtomicU32,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit fail with a storage error, applying nothing.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Make the next `count` commits report a version conflict.
    pub fn inject_conflicts(&self, count: u32) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    /// Number of commit attempts seen so far, successful or not.
    pub fn commit_attempts(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_injected_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn load_account(&self, user_id: UserId) -> WalletResult<Option<Account>> {
        Ok(self.state().accounts.get(&user_id).cloned())
    }

    async fn find_reservation(
        &self,
        user_id: UserId,
        order_reference: &str,
    ) -> WalletResult<Option<Reservation>> {
        Ok(self
            .state()
            .reservations
            .get(&(user_id, order_reference.to_string()))
            .cloned())
    }

    async fn find_entry(
        &self,
        user_id: UserId,
        order_reference: &str,
        kind: EntryKind,
    ) -> WalletResult<Option<LedgerEntry>> {
        Ok(self.state().entries.get(&user_id).and_then(|entries| {
            entries
                .iter()
                .find(|e| e.kind == kind && e.order_reference.as_deref() == Some(order_reference))
                .cloned()
        }))
    }

    async fn list_entries(&self, user_id: UserId, limit: i64) -> WalletResult<Vec<LedgerEntry>> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .state()
            .entries
            .get(&user_id)
            .map(|entries| entries.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn entry_sum(&self, user_id: UserId) -> WalletResult<Amount> {
        Ok(self
            .state()
            .entries
            .get(&user_id)
            .map(|entries| entries.iter().map(|e| e.amount).sum())
            .unwrap_or(0))
    }

    async fn commit(&self, commit: Commit) -> WalletResult<CommitStatus> {
        self.commits.fetch_add(1, Ordering::SeqCst);

        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(WalletError::Storage("injected commit failure".to_string()));
        }
        if self.take_injected_conflict() {
            return Ok(CommitStatus::Conflict);
        }

        let mut state = self.state();
        let now = Utc::now();

        // Validate everything before touching anything.
        let current_version = state
            .accounts
            .get(&commit.user_id)
            .map(|a| a.version)
            .unwrap_or(0);
        if current_version != commit.expected_version {
            return Ok(CommitStatus::Conflict);
        }

        if let Some(entry) = &commit.entry
            && let Some(reference) = entry.order_reference.as_deref()
        {
            let duplicate = state.entries.get(&commit.user_id).is_some_and(|entries| {
                entries
                    .iter()
                    .any(|e| e.kind == entry.kind && e.order_reference.as_deref() == Some(reference))
            });
            if duplicate {
                return Ok(CommitStatus::Conflict);
            }
        }

        match &commit.reservation {
            Some(ReservationWrite::Open {
                order_reference, ..
            }) => {
                if commit.entry.is_none() {
                    return Err(WalletError::Storage(
                        "reservation opened without a purchase entry".to_string(),
                    ));
                }
                if state
                    .reservations
                    .contains_key(&(commit.user_id, order_reference.clone()))
                {
                    return Ok(CommitStatus::Conflict);
                }
            }
            Some(ReservationWrite::Transition {
                reservation_id,
                from,
                ..
            }) => {
                let matches = state.reservations.values().any(|r| {
                    r.user_id == commit.user_id
                        && r.reservation_id == *reservation_id
                        && r.state == *from
                });
                if !matches {
                    return Ok(CommitStatus::Conflict);
                }
            }
            None => {}
        }

        // Apply.
        let account = {
            let account = state
                .accounts
                .entry(commit.user_id)
                .or_insert_with(|| Account::empty(commit.user_id));
            account.balance = commit.balance;
            account.status = commit.status;
            account.version = current_version + 1;
            account.updated_at = now;
            account.clone()
        };

        let entry = match commit.entry {
            Some(new_entry) => {
                state.last_entry_id += 1;
                let entry = LedgerEntry {
                    entry_id: state.last_entry_id,
                    user_id: commit.user_id,
                    amount: new_entry.amount,
                    balance_after: commit.balance,
                    kind: new_entry.kind,
                    order_reference: new_entry.order_reference,
                    description: new_entry.description,
                    created_at: now,
                };
                state
                    .entries
                    .entry(commit.user_id)
                    .or_default()
                    .push(entry.clone());
                Some(entry)
            }
            None => None,
        };

        let reservation = match commit.reservation {
            Some(ReservationWrite::Open {
                order_reference,
                amount,
            }) => {
                let reservation_id = entry.as_ref().map(|e| e.entry_id).unwrap_or_default();
                let reservation = Reservation {
                    reservation_id,
                    user_id: commit.user_id,
                    order_reference: order_reference.clone(),
                    amount,
                    state: ReservationState::Reserved,
                    release_entry_id: None,
                    created_at: now,
                    updated_at: now,
                };
                state
                    .reservations
                    .insert((commit.user_id, order_reference), reservation.clone());
                Some(reservation)
            }
            Some(ReservationWrite::Transition {
                reservation_id, to, ..
            }) => state
                .reservations
                .values_mut()
                .find(|r| r.user_id == commit.user_id && r.reservation_id == reservation_id)
                .map(|r| {
                    r.state = to;
                    if let Some(entry) = &entry {
                        r.release_entry_id = Some(entry.entry_id);
                    }
                    r.updated_at = now;
                    r.clone()
                }),
            None => None,
        };

        Ok(CommitStatus::Committed(CommitReceipt {
            account,
            entry,
            reservation,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::NewEntry;
    use crate::wallet::AccountStatus;

    fn credit_commit(user_id: UserId, expected_version: i64, balance: Amount) -> Commit {
        Commit {
            user_id,
            expected_version,
            balance,
            status: AccountStatus::Active,
            entry: Some(NewEntry {
                amount: 100,
                kind: EntryKind::Refund,
                order_reference: None,
                description: None,
            }),
            reservation: None,
        }
    }

    #[tokio::test]
    async fn test_first_commit_creates_account() {
        let store = MemoryLedgerStore::new();
        assert!(store.load_account(1).await.unwrap().is_none());

        let status = store.commit(credit_commit(1, 0, 100)).await.unwrap();
        let CommitStatus::Committed(receipt) = status else {
            panic!("expected commit");
        };
        assert_eq!(receipt.account.version, 1);
        assert_eq!(receipt.entry.unwrap().entry_id, 1);

        let account = store.load_account(1).await.unwrap().unwrap();
        assert_eq!(account.balance, 100);
    }

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryLedgerStore::new();
        store.commit(credit_commit(1, 0, 100)).await.unwrap();

        let status = store.commit(credit_commit(1, 0, 200)).await.unwrap();
        assert!(matches!(status, CommitStatus::Conflict));
        assert_eq!(store.load_account(1).await.unwrap().unwrap().balance, 100);
        assert_eq!(store.entry_sum(1).await.unwrap(), 100);
    }

    #[tokio::test]
    async fn test_duplicate_reference_conflicts() {
        let store = MemoryLedgerStore::new();
        let mut commit = credit_commit(1, 0, 100);
        if let Some(entry) = commit.entry.as_mut() {
            entry.order_reference = Some("r-1".to_string());
        }
        store.commit(commit.clone()).await.unwrap();

        commit.expected_version = 1;
        commit.balance = 200;
        let status = store.commit(commit).await.unwrap();
        assert!(matches!(status, CommitStatus::Conflict));
        assert_eq!(store.list_entries(1, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_injected_failure_applies_nothing() {
        let store = MemoryLedgerStore::new();
        store.fail_next_commit();

        let result = store.commit(credit_commit(1, 0, 100)).await;
        assert!(matches!(result, Err(WalletError::Storage(_))));
        assert!(store.load_account(1).await.unwrap().is_none());

        // Only the next commit fails
        assert!(matches!(
            store.commit(credit_commit(1, 0, 100)).await.unwrap(),
            CommitStatus::Committed(_)
        ));
    }

    #[tokio::test]
    async fn test_injected_conflicts_are_consumed() {
        let store = MemoryLedgerStore::new();
        store.inject_conflicts(2);

        for _ in 0..2 {
            assert!(matches!(
                store.commit(credit_commit(1, 0, 100)).await.unwrap(),
                CommitStatus::Conflict
            ));
        }
        assert!(matches!(
            store.commit(credit_commit(1, 0, 100)).await.unwrap(),
            CommitStatus::Committed(_)
        ));
        assert_eq!(store.commit_attempts(), 3);
    }

    #[tokio::test]
    async fn test_list_entries_newest_first() {
        let store = MemoryLedgerStore::new();
        store.commit(credit_commit(1, 0, 100)).await.unwrap();
        store.commit(credit_commit(1, 1, 200)).await.unwrap();
        store.commit(credit_commit(1, 2, 300)).await.unwrap();

        let entries = store.list_entries(1, 2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].entry_id, 3);
        assert_eq!(entries[1].entry_id, 2);
        assert!(store.list_entries(2, 10).await.unwrap().is_empty());
    }
}
