//! In-memory ledger store
//!
//! Thread-safe, non-durable implementation used by tests and by embedders
//! that bring their own snapshotting.

use crate::store::{Checkpoint, LedgerStore};
use async_trait::async_trait;
use fitcoin_core::{AccountId, Error, LedgerEntry, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<AccountId, Vec<LedgerEntry>>,
    /// (account, dedupe key) -> index into the account's entries
    dedupe_index: HashMap<(AccountId, String), usize>,
    checkpoints: HashMap<AccountId, Checkpoint>,
}

/// Memory-backed ledger
#[derive(Debug, Default)]
pub struct MemoryLedger {
    inner: RwLock<Inner>,
    offline: AtomicBool,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every call fails with `StoreUnavailable` until cleared
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::StoreUnavailable("memory ledger offline".to_string()));
        }
        Ok(())
    }

    /// Total number of committed entries across all accounts
    pub async fn len(&self) -> usize {
        self.inner.read().await.entries.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl LedgerStore for MemoryLedger {
    async fn append(&self, entry: &LedgerEntry, expected_version: u64) -> Result<()> {
        self.check_online()?;
        let mut inner = self.inner.write().await;

        let current = inner
            .entries
            .get(&entry.account_id)
            .map(|e| e.len() as u64)
            .unwrap_or(0);
        if current != expected_version || entry.sequence != expected_version + 1 {
            return Err(Error::AccountVersionConflict {
                account_id: entry.account_id.to_string(),
                expected: expected_version,
                actual: current,
            });
        }

        if let Some(key) = &entry.dedupe_key {
            let index_key = (entry.account_id.clone(), key.clone());
            if inner.dedupe_index.contains_key(&index_key) {
                return Err(Error::DuplicateEvent {
                    account_id: entry.account_id.to_string(),
                    dedupe_key: key.clone(),
                });
            }
            inner.dedupe_index.insert(index_key, current as usize);
        }

        inner
            .entries
            .entry(entry.account_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn entries_since(&self, account: &AccountId, after_sequence: u64) -> Result<Vec<LedgerEntry>> {
        self.check_online()?;
        let inner = self.inner.read().await;
        Ok(inner
            .entries
            .get(account)
            .map(|entries| {
                entries
                    .iter()
                    .skip(after_sequence as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn find_by_dedupe_key(&self, account: &AccountId, key: &str) -> Result<Option<LedgerEntry>> {
        self.check_online()?;
        let inner = self.inner.read().await;
        let index = inner
            .dedupe_index
            .get(&(account.clone(), key.to_string()))
            .copied();
        Ok(index.and_then(|i| inner.entries.get(account).and_then(|e| e.get(i).cloned())))
    }

    async fn version(&self, account: &AccountId) -> Result<u64> {
        self.check_online()?;
        let inner = self.inner.read().await;
        Ok(inner.entries.get(account).map(|e| e.len() as u64).unwrap_or(0))
    }

    async fn accounts(&self) -> Result<Vec<AccountId>> {
        self.check_online()?;
        let inner = self.inner.read().await;
        let mut accounts: Vec<AccountId> = inner.entries.keys().cloned().collect();
        accounts.sort();
        Ok(accounts)
    }

    async fn load_checkpoint(&self, account: &AccountId) -> Result<Option<Checkpoint>> {
        self.check_online()?;
        Ok(self.inner.read().await.checkpoints.get(account).cloned())
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.check_online()?;
        let mut inner = self.inner.write().await;
        let stale = inner
            .checkpoints
            .get(&checkpoint.account_id)
            .map(|existing| existing.version >= checkpoint.version)
            .unwrap_or(false);
        if !stale {
            inner
                .checkpoints
                .insert(checkpoint.account_id.clone(), checkpoint.clone());
        }
        Ok(())
    }
}
