//! Inbound payloads from the activity and back-office collaborators

use crate::types::{AccountId, IdempotencyKey};
use serde::{Deserialize, Serialize};

/// Reward-earning activity reported by the tracking collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub account_id: AccountId,
    /// Source kind as sent by the client, e.g. `"streak"`
    pub kind: String,
    pub idempotency_key: IdempotencyKey,
    /// 1-based challenge milestone; ignored for other kinds
    #[serde(default)]
    pub milestone: Option<u32>,
}

impl ActivityEvent {
    pub fn new(account_id: AccountId, kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            account_id,
            kind: kind.into(),
            idempotency_key: IdempotencyKey::new(key),
            milestone: None,
        }
    }

    pub fn with_milestone(mut self, milestone: u32) -> Self {
        self.milestone = Some(milestone);
        self
    }
}

/// Operator credit correction
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualAdjustment {
    pub account_id: AccountId,
    pub amount: i64,
    pub reason: String,
    pub idempotency_key: IdempotencyKey,
}
