//! Checkout-facing redemption models

use super::ledger::LedgerEntry;
use crate::types::{AccountId, IdempotencyKey, MinorUnits, ProductId};
use serde::{Deserialize, Serialize};

/// Spend request produced by the store/checkout collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionRequest {
    pub account_id: AccountId,
    pub product_id: ProductId,
    pub requested_fitcoin_amount: i64,
    pub idempotency_key: IdempotencyKey,
}

/// Committed redemption
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Redemption {
    pub entry: LedgerEntry,
    /// True when the idempotency key had already been committed and the
    /// original debit is being returned
    pub replayed: bool,
}

/// Currency value of a FitCoin amount under the configured conversion rate
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discount {
    pub fitcoins: i64,
    pub amount: MinorUnits,
    pub currency: String,
}

/// Result of an ingestion call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ingested {
    pub entry: LedgerEntry,
    /// The event had already been credited; `entry` is the original credit
    pub duplicate: bool,
}
