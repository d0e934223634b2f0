//! Event Ingestor
//!
//! Turns activity events into Earn entries at the account's current tier
//! multiplier, and operator corrections into Adjust entries.

use crate::context::LedgerContext;
use chrono::{DateTime, NaiveDate, Utc};
use fitcoin_core::{
    ActivityEvent, Error, IdempotencyKey, Ingested, LedgerEntry, ManualAdjustment, Result,
    SourceEvent,
};
use fitcoin_persistence::LedgerStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Dedupe key for an earn. Ordinary events are keyed by the caller's key alone,
/// so a retry stays a duplicate whatever day it lands on. Once-per-day sources
/// ignore the caller's key so the same streak can't be credited twice on one
/// UTC day.
pub fn earn_dedupe_key(
    source: SourceEvent,
    day: NaiveDate,
    key: &IdempotencyKey,
    once_per_day: bool,
) -> String {
    if once_per_day {
        format!("earn:{}:{}", source, day)
    } else {
        format!("earn:{}:{}", source, key.as_str())
    }
}

pub fn adjust_dedupe_key(key: &IdempotencyKey) -> String {
    format!("adjust:{}", key.as_str())
}

pub struct EventIngestor<S> {
    ctx: Arc<LedgerContext<S>>,
}

impl<S> Clone for EventIngestor<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: LedgerStore> EventIngestor<S> {
    pub(crate) fn new(ctx: Arc<LedgerContext<S>>) -> Self {
        Self { ctx }
    }

    /// Credit an activity. Replays of an already-credited event return the
    /// original entry with `duplicate = true` and write nothing.
    pub async fn submit(&self, event: &ActivityEvent) -> Result<Ingested> {
        let source: SourceEvent = event.kind.parse()?;
        if !source.is_earnable() {
            return Err(Error::InvalidEventKind(event.kind.clone()));
        }

        let config = self.ctx.config().await;
        let base = config.rates.base_amount(source, event.milestone)?;
        let once_per_day = config.is_once_per_day(source);
        let policy = config.tiers.clone();
        let expiry_months = config.expiry_months;

        let committed = self
            .ctx
            .commit(
                &event.account_id,
                "ingest",
                |at: DateTime<Utc>| {
                    earn_dedupe_key(source, at.date_naive(), &event.idempotency_key, once_per_day)
                },
                |state, header, dedupe_key| {
                    let lifetime = state.lifetime_earned(header.created_at, policy.window());
                    let tier = policy.tier_for(lifetime);
                    let amount = policy.apply_multiplier(tier, base);
                    debug!(
                        "Crediting {} {} for {}: base {} at {} tier",
                        header.account_id, source, amount, base, tier
                    );
                    LedgerEntry::earn(header, source, amount, expiry_months, dedupe_key)
                },
            )
            .await?;

        if committed.replayed {
            debug!(
                "Duplicate {} event for {} ignored (key {})",
                source,
                event.account_id,
                event.idempotency_key.as_str()
            );
        } else {
            info!(
                "Credited {} FitCoins to {} for {}",
                committed.entry.amount, event.account_id, source
            );
        }

        Ok(Ingested {
            entry: committed.entry,
            duplicate: committed.replayed,
        })
    }

    /// Append a positive correction. Adjustments are spendable and expire like
    /// earned coins but do not count toward tier.
    pub async fn adjust(&self, adjustment: &ManualAdjustment) -> Result<Ingested> {
        if adjustment.amount <= 0 {
            return Err(Error::InvalidAmount(adjustment.amount));
        }
        let expiry_months = self.ctx.config().await.expiry_months;
        let dedupe_key = adjust_dedupe_key(&adjustment.idempotency_key);

        let committed = self
            .ctx
            .commit(
                &adjustment.account_id,
                "adjust",
                |_| dedupe_key.clone(),
                |_, header, key| {
                    LedgerEntry::adjust(
                        header,
                        adjustment.amount,
                        expiry_months,
                        adjustment.reason.clone(),
                        key,
                    )
                },
            )
            .await?;

        if !committed.replayed {
            info!(
                "Adjusted {} by {} ({})",
                adjustment.account_id, adjustment.amount, adjustment.reason
            );
        }

        Ok(Ingested {
            entry: committed.entry,
            duplicate: committed.replayed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RewardsLedger;
    use chrono::{Duration, TimeZone};
    use fitcoin_core::{AccountId, Clock, EntryKind, ManualClock, RewardsConfig};
    use fitcoin_persistence::MemoryLedger;

    fn setup() -> (RewardsLedger<MemoryLedger>, Arc<MemoryLedger>, Arc<ManualClock>) {
        let store = Arc::new(MemoryLedger::new());
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 2, 7, 0, 0).unwrap(),
        ));
        let ledger = RewardsLedger::with_clock(store.clone(), RewardsConfig::default(), clock.clone()).unwrap();
        (ledger, store, clock)
    }

    #[test]
    fn test_dedupe_keys() {
        let day = NaiveDate::from_ymd_opt(2025, 6, 2).unwrap();
        let key = IdempotencyKey::new("evt-1");
        assert_eq!(
            earn_dedupe_key(SourceEvent::Workout, day, &key, false),
            "earn:workout:evt-1"
        );
        assert_eq!(
            earn_dedupe_key(SourceEvent::Streak, day, &key, true),
            "earn:streak:2025-06-02"
        );
    }

    #[tokio::test]
    async fn test_unknown_and_non_earnable_kinds_rejected() {
        let (ledger, store, _clock) = setup();
        let account = AccountId::new("a");

        let err = ledger
            .submit(&ActivityEvent::new(account.clone(), "meditation", "k1"))
            .await
            .unwrap_err();
        assert_eq!(err, Error::InvalidEventKind("meditation".to_string()));

        let err = ledger
            .submit(&ActivityEvent::new(account.clone(), "redemption", "k2"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEventKind(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_same_event_twice_credits_once() {
        let (ledger, store, _clock) = setup();
        let account = AccountId::new("a");
        let event = ActivityEvent::new(account.clone(), "workout", "session-42");

        let first = ledger.submit(&event).await.unwrap();
        let second = ledger.submit(&event).await.unwrap();

        assert!(!first.duplicate);
        assert!(second.duplicate);
        assert_eq!(first.entry, second.entry);
        assert_eq!(store.len().await, 1);
        assert_eq!(ledger.balance_of(&account).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_retry_after_midnight_is_still_duplicate() {
        let (ledger, store, clock) = setup();
        let account = AccountId::new("a");
        let event = ActivityEvent::new(account.clone(), "workout", "session-1");

        clock.set(Utc.with_ymd_and_hms(2025, 6, 2, 23, 59, 59).unwrap());
        let first = ledger.submit(&event).await.unwrap();
        assert!(!first.duplicate);

        clock.set(Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 1).unwrap());
        let retried = ledger.submit(&event).await.unwrap();
        assert!(retried.duplicate);
        assert_eq!(retried.entry.entry_id, first.entry.entry_id);
        assert_eq!(store.len().await, 1);
        assert_eq!(ledger.balance_of(&account).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_streak_once_per_day_regardless_of_key() {
        let (ledger, _store, clock) = setup();
        let account = AccountId::new("a");

        ledger.submit(&ActivityEvent::new(account.clone(), "streak", "a")).await.unwrap();
        let again = ledger
            .submit(&ActivityEvent::new(account.clone(), "streak", "b"))
            .await
            .unwrap();
        assert!(again.duplicate);
        assert_eq!(ledger.balance_of(&account).await.unwrap(), 5);

        clock.advance(Duration::days(1));
        let next_day = ledger
            .submit(&ActivityEvent::new(account.clone(), "streak", "b"))
            .await
            .unwrap();
        assert!(!next_day.duplicate);
        assert_eq!(ledger.balance_of(&account).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn test_challenge_milestone_rates() {
        let (ledger, _store, _clock) = setup();
        let account = AccountId::new("a");

        let credited = ledger
            .submit(&ActivityEvent::new(account.clone(), "challenge", "c1").with_milestone(2))
            .await
            .unwrap();
        assert_eq!(credited.entry.amount, 60);
        assert_eq!(credited.entry.source_event, SourceEvent::Challenge);

        let err = ledger
            .submit(&ActivityEvent::new(account.clone(), "challenge", "c2").with_milestone(9))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidEventKind(_)));
    }

    #[tokio::test]
    async fn test_earn_expires_twelve_months_out() {
        let (ledger, _store, clock) = setup();
        let account = AccountId::new("a");
        let credited = ledger
            .submit(&ActivityEvent::new(account, "referral", "r1"))
            .await
            .unwrap();
        assert_eq!(credited.entry.kind, EntryKind::Earn);
        assert_eq!(
            credited.entry.expires_at,
            Some(Utc.with_ymd_and_hms(2026, 6, 2, 7, 0, 0).unwrap())
        );
        assert_eq!(credited.entry.created_at, clock.now());
    }

    #[tokio::test]
    async fn test_adjustment_is_spendable_but_not_tier_credit() {
        let (ledger, _store, _clock) = setup();
        let account = AccountId::new("a");
        let adjustment = ManualAdjustment {
            account_id: account.clone(),
            amount: 500,
            reason: "missed challenge payout".to_string(),
            idempotency_key: IdempotencyKey::new("ticket-17"),
        };

        let first = ledger.adjust(&adjustment).await.unwrap();
        assert_eq!(first.entry.kind, EntryKind::Adjust);
        assert!(ledger.adjust(&adjustment).await.unwrap().duplicate);

        assert_eq!(ledger.balance_of(&account).await.unwrap(), 500);
        assert_eq!(ledger.tier_of(&account).await.unwrap(), fitcoin_core::Tier::Bronze);

        let negative = ManualAdjustment { amount: -3, ..adjustment };
        assert_eq!(ledger.adjust(&negative).await.unwrap_err(), Error::InvalidAmount(-3));
    }

    #[tokio::test]
    async fn test_store_outage_surfaces_without_partial_state() {
        let (ledger, store, _clock) = setup();
        store.set_offline(true);
        let err = ledger
            .submit(&ActivityEvent::new(AccountId::new("a"), "workout", "w"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));
        store.set_offline(false);
        assert!(store.is_empty().await);
    }
}
