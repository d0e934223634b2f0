//! State shared by the ledger components

use crate::balance::CachedState;
use crate::locks::AccountLocks;
use crate::replay::AccountState;
use chrono::{DateTime, Utc};
use fitcoin_core::{AccountId, Clock, EntryHeader, Error, LedgerEntry, Result, RewardsConfig};
use fitcoin_persistence::LedgerStore;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Accounts with a cached replay snapshot before old ones are evicted
const CACHE_CAPACITY: usize = 4096;

pub struct LedgerContext<S> {
    pub(crate) store: Arc<S>,
    pub(crate) config: RwLock<RewardsConfig>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) locks: AccountLocks,
    pub(crate) cache: RwLock<HashMap<AccountId, CachedState>>,
    pub(crate) cache_capacity: usize,
}

/// Outcome of [`LedgerContext::commit`]
#[derive(Debug, Clone)]
pub(crate) struct Committed {
    pub entry: LedgerEntry,
    /// The dedupe key was already taken; `entry` is the earlier commit
    pub replayed: bool,
}

impl<S: LedgerStore> LedgerContext<S> {
    pub(crate) fn new(store: Arc<S>, config: RewardsConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config: RwLock::new(config),
            clock,
            locks: AccountLocks::new(),
            cache: RwLock::new(HashMap::new()),
            cache_capacity: CACHE_CAPACITY,
        }
    }

    pub(crate) async fn config(&self) -> RewardsConfig {
        self.config.read().await.clone()
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Timestamp for the next entry: never earlier than the account's last entry
    pub(crate) fn commit_time(&self, state: &AccountState) -> DateTime<Utc> {
        let now = self.now();
        match state.last_created_at() {
            Some(last) if last > now => last,
            _ => now,
        }
    }

    /// Run `fut` under the operation timeout
    pub(crate) async fn with_deadline<T, F>(&self, timeout: Duration, label: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("{} timed out after {}ms", label, timeout.as_millis());
                Err(Error::Timeout(format!("{} exceeded {}ms", label, timeout.as_millis())))
            }
        }
    }

    /// Append one entry for `account` under its lock, with bounded retries on
    /// version conflicts.
    ///
    /// `dedupe_key` derives the uniqueness key from the commit timestamp; if an
    /// entry with that key exists it is returned instead of calling `build`.
    /// `build` runs all validation against the freshly replayed state; an
    /// error from it aborts without writing anything.
    pub(crate) async fn commit<K, B>(
        &self,
        account: &AccountId,
        label: &str,
        dedupe_key: K,
        mut build: B,
    ) -> Result<Committed>
    where
        K: Fn(DateTime<Utc>) -> String,
        B: FnMut(&AccountState, EntryHeader, String) -> Result<LedgerEntry>,
    {
        let config = self.config().await;
        let retries = config.max_conflict_retries;

        self.with_deadline(config.operation_timeout(), label, async {
            let _guard = self.locks.acquire(account).await;

            for attempt in 0..=retries {
                let state = crate::balance::BalanceEngine::load_state(self, account).await?;
                let created_at = self.commit_time(&state);
                let key = dedupe_key(created_at);

                if let Some(prior) = self.store.find_by_dedupe_key(account, &key).await? {
                    debug!("{} for {} already committed as {}", label, account, prior.entry_id);
                    return Ok(Committed { entry: prior, replayed: true });
                }

                let header = EntryHeader::new(account.clone(), state.version() + 1, created_at);
                let entry = build(&state, header, key)?;

                match self.store.append(&entry, state.version()).await {
                    Ok(()) => return Ok(Committed { entry, replayed: false }),
                    Err(Error::AccountVersionConflict { expected, actual, .. }) => {
                        debug!(
                            "{} for {} lost version race ({} vs {}), attempt {}",
                            label, account, expected, actual, attempt + 1
                        );
                    }
                    // Someone committed the same key between our lookup and append;
                    // the next pass returns their entry
                    Err(Error::DuplicateEvent { .. }) => {}
                    Err(e) => return Err(e),
                }
            }

            warn!("{} for {} gave up after {} version conflicts", label, account, retries + 1);
            Err(Error::Timeout(format!(
                "{} for {} still conflicting after {} attempts",
                label,
                account,
                retries + 1
            )))
        })
        .await
    }
}
