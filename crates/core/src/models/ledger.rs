//! Ledger entry model

use crate::errors::{Error, Result};
use crate::types::{AccountId, EntryId};
use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of balance-affecting fact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntryKind {
    Earn,
    Redeem,
    Expire,
    Adjust,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Earn => "EARN",
            EntryKind::Redeem => "REDEEM",
            EntryKind::Expire => "EXPIRE",
            EntryKind::Adjust => "ADJUST",
        }
    }

    /// Earn and Adjust entries create spendable lots
    pub fn is_credit(&self) -> bool {
        matches!(self, EntryKind::Earn | EntryKind::Adjust)
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EARN" => Ok(EntryKind::Earn),
            "REDEEM" => Ok(EntryKind::Redeem),
            "EXPIRE" => Ok(EntryKind::Expire),
            "ADJUST" => Ok(EntryKind::Adjust),
            other => Err(Error::InvalidData(format!("unknown entry kind '{}'", other))),
        }
    }
}

/// What produced a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceEvent {
    Workout,
    Streak,
    Challenge,
    Referral,
    Purchase,
    ManualAdjust,
    Redemption,
    Expiry,
}

impl SourceEvent {
    /// Sources the activity collaborator is allowed to submit for earning
    pub const EARNABLE: [SourceEvent; 5] = [
        SourceEvent::Workout,
        SourceEvent::Streak,
        SourceEvent::Challenge,
        SourceEvent::Referral,
        SourceEvent::Purchase,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceEvent::Workout => "workout",
            SourceEvent::Streak => "streak",
            SourceEvent::Challenge => "challenge",
            SourceEvent::Referral => "referral",
            SourceEvent::Purchase => "purchase",
            SourceEvent::ManualAdjust => "manualAdjust",
            SourceEvent::Redemption => "redemption",
            SourceEvent::Expiry => "expiry",
        }
    }

    pub fn is_earnable(&self) -> bool {
        Self::EARNABLE.contains(self)
    }
}

impl fmt::Display for SourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceEvent {
    type Err = Error;

    /// Case-insensitive; activity payloads arrive as free-form strings
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "workout" => Ok(SourceEvent::Workout),
            "streak" => Ok(SourceEvent::Streak),
            "challenge" => Ok(SourceEvent::Challenge),
            "referral" => Ok(SourceEvent::Referral),
            "purchase" => Ok(SourceEvent::Purchase),
            "manualadjust" => Ok(SourceEvent::ManualAdjust),
            "redemption" => Ok(SourceEvent::Redemption),
            "expiry" => Ok(SourceEvent::Expiry),
            _ => Err(Error::InvalidEventKind(s.to_string())),
        }
    }
}

/// Immutable signed FitCoin delta for one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub entry_id: EntryId,
    pub account_id: AccountId,
    /// 1-based position within the account; equals the account version after commit
    pub sequence: u64,
    pub kind: EntryKind,
    /// Positive for Earn/Adjust, negative for Redeem/Expire
    pub amount: i64,
    pub source_event: SourceEvent,
    pub created_at: DateTime<Utc>,
    /// Only set on Earn/Adjust
    pub expires_at: Option<DateTime<Utc>>,
    /// Expire entries point at the lot they net
    #[serde(default)]
    pub reference: Option<EntryId>,
    #[serde(default)]
    pub dedupe_key: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

/// Fields shared by every entry constructor
#[derive(Debug, Clone)]
pub struct EntryHeader {
    pub account_id: AccountId,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
}

impl EntryHeader {
    pub fn new(account_id: AccountId, sequence: u64, created_at: DateTime<Utc>) -> Self {
        Self {
            account_id,
            sequence,
            created_at,
        }
    }
}

/// `created_at + months`, failing only past chrono's representable range
pub fn expiry_after(created_at: DateTime<Utc>, months: u32) -> Result<DateTime<Utc>> {
    created_at
        .checked_add_months(Months::new(months))
        .ok_or_else(|| Error::InvalidData(format!("expiry overflow from {}", created_at)))
}

impl LedgerEntry {
    fn base(header: EntryHeader, kind: EntryKind, amount: i64, source: SourceEvent) -> Self {
        Self {
            entry_id: EntryId::for_sequence(&header.account_id, header.sequence),
            account_id: header.account_id,
            sequence: header.sequence,
            kind,
            amount,
            source_event: source,
            created_at: header.created_at,
            expires_at: None,
            reference: None,
            dedupe_key: None,
            note: None,
        }
    }

    /// Credit earned from an activity
    pub fn earn(
        header: EntryHeader,
        source: SourceEvent,
        amount: i64,
        expiry_months: u32,
        dedupe_key: String,
    ) -> Result<Self> {
        if amount <= 0 {
            return Err(Error::InvalidAmount(amount));
        }
        let expires_at = expiry_after(header.created_at, expiry_months)?;
        let mut entry = Self::base(header, EntryKind::Earn, amount, source);
        entry.expires_at = Some(expires_at);
        entry.dedupe_key = Some(dedupe_key);
        Ok(entry)
    }

    /// Operator correction, spendable like an earned lot
    pub fn adjust(
        header: EntryHeader,
        amount: i64,
        expiry_months: u32,
        reason: String,
        dedupe_key: String,
    ) -> Result<Self> {
        if amount <= 0 {
            return Err(Error::InvalidAmount(amount));
        }
        let expires_at = expiry_after(header.created_at, expiry_months)?;
        let mut entry = Self::base(header, EntryKind::Adjust, amount, SourceEvent::ManualAdjust);
        entry.expires_at = Some(expires_at);
        entry.note = Some(reason);
        entry.dedupe_key = Some(dedupe_key);
        Ok(entry)
    }

    /// Debit for a checkout; `amount` is the positive FitCoin count spent
    pub fn redeem(header: EntryHeader, amount: i64, product: &str, dedupe_key: String) -> Result<Self> {
        if amount <= 0 {
            return Err(Error::InvalidAmount(amount));
        }
        let mut entry = Self::base(header, EntryKind::Redeem, -amount, SourceEvent::Redemption);
        entry.note = Some(product.to_string());
        entry.dedupe_key = Some(dedupe_key);
        Ok(entry)
    }

    /// Write-off of the unconsumed remainder of `lot`
    pub fn expire(header: EntryHeader, lot: &EntryId, remainder: i64) -> Result<Self> {
        if remainder <= 0 {
            return Err(Error::InvalidAmount(remainder));
        }
        let mut entry = Self::base(header, EntryKind::Expire, -remainder, SourceEvent::Expiry);
        entry.dedupe_key = Some(expire_dedupe_key(lot));
        entry.reference = Some(lot.clone());
        Ok(entry)
    }
}

/// Each lot can be written off at most once
pub fn expire_dedupe_key(lot: &EntryId) -> String {
    format!("expire:{}", lot.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn header(seq: u64) -> EntryHeader {
        let at = Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap();
        EntryHeader::new(AccountId::new("acct"), seq, at)
    }

    #[test]
    fn test_earn_expires_twelve_months_later() {
        let entry = LedgerEntry::earn(header(1), SourceEvent::Streak, 5, 12, "k".into()).unwrap();
        // Leap day rolls back to the last day of February
        assert_eq!(
            entry.expires_at,
            Some(Utc.with_ymd_and_hms(2025, 2, 28, 12, 0, 0).unwrap())
        );
        assert_eq!(entry.entry_id.as_str(), "acct#0000000001");
        assert_eq!(entry.kind, EntryKind::Earn);
    }

    #[test]
    fn test_redeem_and_expire_are_negative_without_expiry() {
        let redeem = LedgerEntry::redeem(header(2), 40, "bottle", "redeem:r1".into()).unwrap();
        assert_eq!(redeem.amount, -40);
        assert!(redeem.expires_at.is_none());

        let lot = EntryId::for_sequence(&AccountId::new("acct"), 1);
        let expire = LedgerEntry::expire(header(3), &lot, 7).unwrap();
        assert_eq!(expire.amount, -7);
        assert_eq!(expire.reference, Some(lot.clone()));
        assert_eq!(expire.dedupe_key, Some(expire_dedupe_key(&lot)));
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        assert_eq!(
            LedgerEntry::redeem(header(1), 0, "p", "k".into()).unwrap_err(),
            Error::InvalidAmount(0)
        );
        assert!(LedgerEntry::adjust(header(1), -5, 12, "oops".into(), "k".into()).is_err());
    }

    #[test]
    fn test_source_event_parsing() {
        assert_eq!("Streak".parse::<SourceEvent>().unwrap(), SourceEvent::Streak);
        assert_eq!(" REFERRAL ".parse::<SourceEvent>().unwrap(), SourceEvent::Referral);
        assert!(matches!(
            "yoga".parse::<SourceEvent>(),
            Err(Error::InvalidEventKind(_))
        ));
        assert!(!SourceEvent::Redemption.is_earnable());
        assert_eq!("EXPIRE".parse::<EntryKind>().unwrap(), EntryKind::Expire);
    }
}
