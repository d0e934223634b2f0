//! The ledger store contract
//!
//! Any durable medium works as long as `append` is an atomic per-account
//! compare-and-set on the account version and dedupe keys are unique per
//! account.

use async_trait::async_trait;
use fitcoin_core::{AccountId, LedgerEntry, Result};

/// Serialized replay snapshot for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub account_id: AccountId,
    /// Sequence of the last entry folded into `snapshot`
    pub version: u64,
    pub snapshot: String,
}

/// Append-only FitCoin ledger
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Commit `entry` if the account is still at `expected_version`.
    ///
    /// Fails with `AccountVersionConflict` when another writer got there first
    /// (or `entry.sequence != expected_version + 1`) and with `DuplicateEvent`
    /// when the entry's dedupe key is already taken.
    async fn append(&self, entry: &LedgerEntry, expected_version: u64) -> Result<()>;

    /// Entries with `sequence > after_sequence`, in commit order
    async fn entries_since(&self, account: &AccountId, after_sequence: u64) -> Result<Vec<LedgerEntry>>;

    /// Full history of an account, ordered by `created_at` then `entry_id`
    async fn entries_for(&self, account: &AccountId) -> Result<Vec<LedgerEntry>> {
        self.entries_since(account, 0).await
    }

    async fn find_by_dedupe_key(&self, account: &AccountId, key: &str) -> Result<Option<LedgerEntry>>;

    /// Sequence of the latest entry, 0 for an empty account
    async fn version(&self, account: &AccountId) -> Result<u64>;

    /// Every account with at least one entry
    async fn accounts(&self) -> Result<Vec<AccountId>>;

    async fn load_checkpoint(&self, account: &AccountId) -> Result<Option<Checkpoint>>;

    /// Overwrites any older snapshot; a snapshot older than the stored one is ignored
    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()>;
}
