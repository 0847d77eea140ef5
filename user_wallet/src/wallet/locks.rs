//! Per-account mutation locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::models::UserId;

/// Hands out one async mutex per account. Accounts never share a lock.
#[derive(Default)]
pub(crate) struct AccountLocks {
    locks: Mutex<HashMap<UserId, Arc<AsyncMutex<()>>>>,
}

impl AccountLocks {
    /// Wait up to `wait` for the account's lock. `None` on timeout.
    pub(crate) async fn acquire(&self, user_id: UserId, wait: Duration) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop locks nobody is holding or waiting on
            if locks.len() > 1024 {
                locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            locks.entry(user_id).or_default().clone()
        };

        tokio::time::timeout(wait, lock.lock_owned()).await.ok()
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
