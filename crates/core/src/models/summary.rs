//! Read models for the FitCoin display and the scheduler

use super::tier::Tier;
use crate::types::{AccountId, EntryId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Portion of an earned lot that is still spendable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringLot {
    pub entry_id: EntryId,
    pub remaining: i64,
    pub expires_at: DateTime<Utc>,
}

/// Everything the wallet screen shows for one account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    pub account_id: AccountId,
    pub as_of: DateTime<Utc>,
    pub balance: u64,
    pub tier: Tier,
    /// Gross earned inside the tier window
    pub lifetime_earned: i64,
    pub next_tier: Option<Tier>,
    pub coins_to_next_tier: Option<i64>,
    pub total_redeemed: i64,
    pub total_expired: i64,
    /// Lots expiring within the configured horizon, soonest first
    pub expiring_soon: Vec<ExpiringLot>,
    pub version: u64,
}

/// Outcome of one expiry sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub as_of: Option<DateTime<Utc>>,
    pub accounts_scanned: u32,
    pub entries_expired: u32,
    pub fitcoins_expired: i64,
    /// Accounts skipped because of a store or lock failure
    pub accounts_failed: u32,
}
