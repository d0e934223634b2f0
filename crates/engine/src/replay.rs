//! FIFO replay of an account's ledger
//!
//! Every Earn/Adjust entry becomes a lot with its own expiry. Debits consume
//! the oldest live lot first, so "unused coins expire after 12 months" is
//! tracked per lot rather than as one aggregate. A lot is spendable while
//! `t <= expires_at`; once an entry is applied after that instant the lot
//! lapses and waits for the sweep to write off its remainder.

use chrono::{DateTime, Duration, Utc};
use fitcoin_core::{EntryId, EntryKind, Error, ExpiringLot, LedgerEntry, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::warn;

/// Unconsumed part of one Earn/Adjust entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lot {
    pub entry_id: EntryId,
    pub remaining: i64,
    pub expires_at: DateTime<Utc>,
}

impl Lot {
    fn is_live_at(&self, at: DateTime<Utc>) -> bool {
        at <= self.expires_at
    }
}

impl From<&Lot> for ExpiringLot {
    fn from(lot: &Lot) -> Self {
        ExpiringLot {
            entry_id: lot.entry_id.clone(),
            remaining: lot.remaining,
            expires_at: lot.expires_at,
        }
    }
}

/// Derived state of one account after replaying its entries in order.
///
/// Serializable so the balance engine can persist it as a checkpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountState {
    version: u64,
    last_created_at: Option<DateTime<Utc>>,
    /// Spendable lots, oldest first
    live: VecDeque<Lot>,
    /// Expired lots with a remainder that no Expire entry has netted yet
    lapsed: Vec<Lot>,
    /// Gross Earn credits still inside the tier window
    earn_history: VecDeque<(DateTime<Utc>, i64)>,
    total_redeemed: i64,
    total_expired: i64,
    /// Debits that found no live lot to draw from
    unbacked_debits: i64,
}

impl AccountState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replay `entries` from scratch
    pub fn replay<'a>(
        entries: impl IntoIterator<Item = &'a LedgerEntry>,
        tier_window: Duration,
    ) -> Result<Self> {
        let mut state = Self::new();
        for entry in entries {
            state.apply(entry, tier_window)?;
        }
        Ok(state)
    }

    /// Sequence of the last applied entry
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn last_created_at(&self) -> Option<DateTime<Utc>> {
        self.last_created_at
    }

    pub fn total_redeemed(&self) -> i64 {
        self.total_redeemed
    }

    pub fn total_expired(&self) -> i64 {
        self.total_expired
    }

    pub fn unbacked_debits(&self) -> i64 {
        self.unbacked_debits
    }

    /// Fold the next entry into the state. Entries must arrive in sequence order.
    pub fn apply(&mut self, entry: &LedgerEntry, tier_window: Duration) -> Result<()> {
        if entry.sequence != self.version + 1 {
            return Err(Error::InvalidData(format!(
                "ledger gap for {}: expected sequence {}, got {}",
                entry.account_id,
                self.version + 1,
                entry.sequence
            )));
        }

        let at = entry.created_at;
        self.lapse(at);

        match entry.kind {
            EntryKind::Earn | EntryKind::Adjust => {
                let expires_at = entry.expires_at.ok_or_else(|| {
                    Error::InvalidData(format!("credit {} has no expiry", entry.entry_id))
                })?;
                self.live.push_back(Lot {
                    entry_id: entry.entry_id.clone(),
                    remaining: entry.amount.max(0),
                    expires_at,
                });
                if entry.kind == EntryKind::Earn {
                    self.earn_history.push_back((at, entry.amount.max(0)));
                }
            }
            EntryKind::Redeem => {
                let amount = -entry.amount;
                self.consume(amount);
                self.total_redeemed += amount;
            }
            EntryKind::Expire => {
                let reference = entry.reference.as_ref().ok_or_else(|| {
                    Error::InvalidData(format!("expire {} has no reference", entry.entry_id))
                })?;
                self.total_expired += self.write_off(reference, -entry.amount);
            }
        }

        let cutoff = at - tier_window;
        while matches!(self.earn_history.front(), Some((t, _)) if *t <= cutoff) {
            self.earn_history.pop_front();
        }

        self.version = entry.sequence;
        self.last_created_at = Some(at);
        Ok(())
    }

    /// Move lots that expired before `at` out of the spendable queue
    fn lapse(&mut self, at: DateTime<Utc>) {
        if self.live.iter().all(|lot| lot.is_live_at(at)) {
            return;
        }
        let (live, expired): (VecDeque<Lot>, VecDeque<Lot>) =
            self.live.drain(..).partition(|lot| lot.is_live_at(at));
        self.live = live;
        self.lapsed
            .extend(expired.into_iter().filter(|lot| lot.remaining > 0));
    }

    /// Draw `amount` from the oldest live lots
    fn consume(&mut self, mut amount: i64) {
        while amount > 0 {
            let Some(front) = self.live.front_mut() else {
                break;
            };
            let take = front.remaining.min(amount);
            front.remaining -= take;
            amount -= take;
            if front.remaining == 0 {
                self.live.pop_front();
            }
        }
        if amount > 0 {
            warn!(
                "Debit exceeded live lots by {} at version {}",
                amount,
                self.version + 1
            );
            self.unbacked_debits += amount;
        }
    }

    /// Net an Expire entry against its lot; returns the amount actually written off
    fn write_off(&mut self, reference: &EntryId, amount: i64) -> i64 {
        let lot = self
            .lapsed
            .iter_mut()
            .chain(self.live.iter_mut())
            .find(|lot| &lot.entry_id == reference);

        let netted = match lot {
            Some(lot) => {
                let netted = lot.remaining.min(amount);
                lot.remaining -= netted;
                netted
            }
            None => 0,
        };
        self.lapsed.retain(|lot| lot.remaining > 0);
        self.live.retain(|lot| lot.remaining > 0);
        netted
    }

    /// Spendable FitCoins at `as_of` (which must not precede the last entry)
    pub fn balance_at(&self, as_of: DateTime<Utc>) -> u64 {
        self.live
            .iter()
            .filter(|lot| lot.is_live_at(as_of))
            .map(|lot| lot.remaining.max(0) as u64)
            .sum()
    }

    /// Gross Earn credits in `(as_of - window, as_of]`
    pub fn lifetime_earned(&self, as_of: DateTime<Utc>, window: Duration) -> i64 {
        let cutoff = as_of - window;
        self.earn_history
            .iter()
            .filter(|(t, _)| *t > cutoff && *t <= as_of)
            .map(|(_, amount)| amount)
            .sum()
    }

    /// Lots past their expiry at `as_of` that still hold an unconsumed remainder
    pub fn pending_expiries(&self, as_of: DateTime<Utc>) -> Vec<Lot> {
        self.lapsed
            .iter()
            .chain(self.live.iter())
            .filter(|lot| lot.remaining > 0 && !lot.is_live_at(as_of))
            .cloned()
            .collect()
    }

    /// Live lots expiring in `[as_of, as_of + horizon)`, soonest first
    pub fn expiring_within(&self, as_of: DateTime<Utc>, horizon: Duration) -> Vec<Lot> {
        let until = as_of + horizon;
        let mut lots: Vec<Lot> = self
            .live
            .iter()
            .filter(|lot| lot.is_live_at(as_of) && lot.expires_at < until)
            .cloned()
            .collect();
        lots.sort_by_key(|lot| lot.expires_at);
        lots
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use chrono::TimeZone;
    use fitcoin_core::{AccountId, EntryHeader, SourceEvent};
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Op {
        Earn { amount: i64, gap_days: i64 },
        Redeem { amount: i64, gap_days: i64 },
        Sweep { gap_days: i64 },
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1i64..100, 0i64..90).prop_map(|(amount, gap_days)| Op::Earn { amount, gap_days }),
            (1i64..200, 0i64..90).prop_map(|(amount, gap_days)| Op::Redeem { amount, gap_days }),
            (0i64..120).prop_map(|gap_days| Op::Sweep { gap_days }),
        ]
    }

    fn window() -> Duration {
        Duration::days(365)
    }

    /// Plain FIFO lots kept alongside the replay for comparison
    #[derive(Default)]
    struct Model {
        lots: Vec<(i64, DateTime<Utc>)>,
        earns: Vec<(DateTime<Utc>, i64)>,
        redeemed: i64,
        expired: i64,
    }

    impl Model {
        fn balance(&self, at: DateTime<Utc>) -> i64 {
            self.lots
                .iter()
                .filter(|(_, expires_at)| at <= *expires_at)
                .map(|(remaining, _)| remaining)
                .sum()
        }

        fn spend(&mut self, at: DateTime<Utc>, mut amount: i64) {
            for (remaining, expires_at) in self.lots.iter_mut() {
                if amount == 0 {
                    break;
                }
                if at > *expires_at {
                    continue;
                }
                let take = (*remaining).min(amount);
                *remaining -= take;
                amount -= take;
            }
            self.lots.retain(|(remaining, _)| *remaining > 0);
        }

        fn earned_in_window(&self, at: DateTime<Utc>) -> i64 {
            self.earns
                .iter()
                .filter(|(t, _)| *t > at - window() && *t <= at)
                .map(|(_, amount)| amount)
                .sum()
        }
    }

    proptest! {
        /// Replayed balances, totals and tier credit track a naive FIFO
        /// model through any mix of earns, redemptions and sweeps.
        #[test]
        fn prop_replay_matches_fifo_model(ops in prop::collection::vec(op(), 1..40)) {
            let account = AccountId::new("prop");
            let mut now = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
            let mut state = AccountState::new();
            let mut model = Model::default();

            for op in ops {
                match op {
                    Op::Earn { amount, gap_days } => {
                        now += Duration::days(gap_days);
                        let header = EntryHeader::new(account.clone(), state.version() + 1, now);
                        let key = format!("earn:{}", header.sequence);
                        let entry = LedgerEntry::earn(header, SourceEvent::Workout, amount, 12, key).unwrap();
                        model.lots.push((amount, entry.expires_at.unwrap()));
                        model.earns.push((now, amount));
                        state.apply(&entry, window()).unwrap();
                    }
                    Op::Redeem { amount, gap_days } => {
                        now += Duration::days(gap_days);
                        let amount = amount.min(state.balance_at(now) as i64);
                        if amount > 0 {
                            let header = EntryHeader::new(account.clone(), state.version() + 1, now);
                            let key = format!("redeem:{}", header.sequence);
                            let entry = LedgerEntry::redeem(header, amount, "p", key).unwrap();
                            model.spend(now, amount);
                            model.redeemed += amount;
                            state.apply(&entry, window()).unwrap();
                        }
                    }
                    Op::Sweep { gap_days } => {
                        now += Duration::days(gap_days);
                        for lot in state.pending_expiries(now) {
                            let header = EntryHeader::new(account.clone(), state.version() + 1, now);
                            let entry = LedgerEntry::expire(header, &lot.entry_id, lot.remaining).unwrap();
                            model.expired += lot.remaining;
                            state.apply(&entry, window()).unwrap();
                        }
                        model.lots.retain(|(_, expires_at)| now <= *expires_at);
                        prop_assert!(state.pending_expiries(now).is_empty());
                    }
                }

                prop_assert_eq!(state.balance_at(now) as i64, model.balance(now));
                prop_assert_eq!(state.lifetime_earned(now, window()), model.earned_in_window(now));
                prop_assert_eq!(state.total_redeemed(), model.redeemed);
                prop_assert_eq!(state.total_expired(), model.expired);
                prop_assert_eq!(state.unbacked_debits(), 0);
            }

            prop_assert_eq!(state.balance_at(now + Duration::days(400)), 0);
        }

        /// Redemptions never change tier credit: the same earns with and
        /// without interleaved redemptions give the same lifetime total.
        #[test]
        fn prop_redemptions_do_not_touch_tier_credit(
            earns in prop::collection::vec((1i64..100, 0i64..60), 1..20),
            redeem_every in 1usize..4,
        ) {
            let account = AccountId::new("prop");
            let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();
            let mut with_redeems = AccountState::new();
            let mut earns_only = AccountState::new();
            let mut now = start;

            for (i, (amount, gap_days)) in earns.into_iter().enumerate() {
                now += Duration::days(gap_days);
                for state in [&mut with_redeems, &mut earns_only] {
                    let header = EntryHeader::new(account.clone(), state.version() + 1, now);
                    let entry = LedgerEntry::earn(header, SourceEvent::Referral, amount, 12, format!("e{}", i)).unwrap();
                    state.apply(&entry, window()).unwrap();
                }
                let spendable = with_redeems.balance_at(now) as i64;
                if i % redeem_every == 0 && spendable > 0 {
                    let header = EntryHeader::new(account.clone(), with_redeems.version() + 1, now);
                    let entry = LedgerEntry::redeem(header, spendable, "p", format!("r{}", i)).unwrap();
                    with_redeems.apply(&entry, window()).unwrap();
                }

                prop_assert_eq!(
                    with_redeems.lifetime_earned(now, window()),
                    earns_only.lifetime_earned(now, window())
                );
            }
        }
    }
}
