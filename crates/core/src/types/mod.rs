//! Shared type definitions and newtypes

use serde::{Deserialize, Serialize};
use std::fmt;

/// Verified account identifier supplied by the authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        AccountId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store product identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        ProductId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Caller-supplied token giving a request at-most-once effect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(pub String);

impl IdempotencyKey {
    pub fn new(key: impl Into<String>) -> Self {
        IdempotencyKey(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Ledger entry identifier: `{account}#{sequence}`, zero-padded so it sorts
/// in commit order within an account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub String);

impl EntryId {
    pub fn for_sequence(account: &AccountId, sequence: u64) -> Self {
        EntryId(format!("{}#{:010}", account.as_str(), sequence))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Currency amount in minor units (paise, cents)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinorUnits(pub i64);

impl MinorUnits {
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Format as a major-unit decimal string, e.g. `965` -> `"9.65"`
    pub fn to_major_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_sorts_by_sequence() {
        let account = AccountId::new("user-7");
        let a = EntryId::for_sequence(&account, 9);
        let b = EntryId::for_sequence(&account, 10);
        assert!(a < b);
        assert_eq!(a.as_str(), "user-7#0000000009");
    }

    #[test]
    fn test_minor_units_formatting() {
        assert_eq!(MinorUnits(965).to_major_string(), "9.65");
        assert_eq!(MinorUnits(5).to_major_string(), "0.05");
        assert_eq!(MinorUnits(-1930).to_major_string(), "-19.30");
    }
}
