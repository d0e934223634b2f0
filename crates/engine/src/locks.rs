//! Per-account serialization point
//!
//! Redemptions, credits and the expiry sweep for one account all commit while
//! holding that account's lock, so they are linearized inside this process.
//! The store's version compare-and-set covers writers in other processes.

use fitcoin_core::AccountId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Entries beyond this many trigger a sweep of idle locks
const PRUNE_THRESHOLD: usize = 4096;

#[derive(Clone, Default)]
pub struct AccountLocks {
    inner: Arc<Mutex<HashMap<AccountId, Arc<Mutex<()>>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `account`
    pub async fn acquire(&self, account: &AccountId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().await;
            if map.len() >= PRUNE_THRESHOLD {
                // Only the map holds idle locks
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            map.entry(account.clone()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Number of accounts with a lock allocated
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
