//! Balance & Tier Engine
//!
//! Balance and tier are never stored; they are derived by replaying the
//! account's ledger. An in-memory snapshot per account means each read only
//! replays entries committed since the previous read, and every
//! `checkpoint_every` entries the snapshot is persisted so a restart doesn't
//! need a full replay either.

use crate::context::LedgerContext;
use crate::replay::AccountState;
use chrono::{DateTime, Utc};
use fitcoin_core::{AccountId, AccountSummary, ExpiringLot, Result, Tier};
use fitcoin_persistence::{Checkpoint, LedgerStore};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Cached replay state plus how far it has been persisted
#[derive(Debug, Clone)]
pub(crate) struct CachedState {
    state: AccountState,
    persisted_version: u64,
}

/// Read side of the ledger
pub struct BalanceEngine<S> {
    ctx: Arc<LedgerContext<S>>,
}

impl<S> Clone for BalanceEngine<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: LedgerStore> BalanceEngine<S> {
    pub(crate) fn new(ctx: Arc<LedgerContext<S>>) -> Self {
        Self { ctx }
    }

    /// Up-to-date replay state: cached snapshot (or persisted checkpoint) plus
    /// any entries committed since
    pub(crate) async fn load_state(ctx: &LedgerContext<S>, account: &AccountId) -> Result<AccountState> {
        let config = ctx.config().await;
        let window = config.tiers.window();

        let cached = ctx.cache.read().await.get(account).cloned();
        let (mut state, mut persisted_version) = match cached {
            Some(cached) => (cached.state, cached.persisted_version),
            None => Self::restore_checkpoint(ctx, account).await?,
        };

        let newer = ctx.store.entries_since(account, state.version()).await?;
        if newer.is_empty() && cached_is_current(ctx, account, &state).await {
            return Ok(state);
        }
        for entry in &newer {
            state.apply(entry, window)?;
        }

        if config.checkpoint_every > 0
            && state.version() >= persisted_version + config.checkpoint_every
        {
            match persist(ctx, account, &state).await {
                Ok(()) => persisted_version = state.version(),
                Err(e) => warn!("Failed to persist checkpoint for {}: {}", account, e),
            }
        }

        let mut cache = ctx.cache.write().await;
        remember(&mut cache, ctx.cache_capacity, account, &state, persisted_version);
        Ok(state)
    }

    async fn restore_checkpoint(ctx: &LedgerContext<S>, account: &AccountId) -> Result<(AccountState, u64)> {
        let Some(checkpoint) = ctx.store.load_checkpoint(account).await? else {
            return Ok((AccountState::new(), 0));
        };

        match serde_json::from_str::<AccountState>(&checkpoint.snapshot) {
            Ok(state) if state.version() == checkpoint.version => {
                debug!("Restored {} from checkpoint at version {}", account, checkpoint.version);
                Ok((state, checkpoint.version))
            }
            Ok(_) => {
                warn!("Checkpoint for {} has mismatched version, replaying from scratch", account);
                Ok((AccountState::new(), 0))
            }
            Err(e) => {
                warn!("Unreadable checkpoint for {} ({}), replaying from scratch", account, e);
                Ok((AccountState::new(), 0))
            }
        }
    }

    pub async fn state(&self, account: &AccountId) -> Result<AccountState> {
        Self::load_state(&self.ctx, account).await
    }

    /// State as it stood at `as_of`. Falls back to a truncated full replay when
    /// `as_of` precedes the latest entry.
    pub async fn state_at(&self, account: &AccountId, as_of: DateTime<Utc>) -> Result<AccountState> {
        let state = self.state(account).await?;
        match state.last_created_at() {
            Some(last) if last > as_of => {
                let window = self.ctx.config().await.tiers.window();
                let entries = self.ctx.store.entries_for(account).await?;
                AccountState::replay(entries.iter().filter(|e| e.created_at <= as_of), window)
            }
            _ => Ok(state),
        }
    }

    pub async fn balance_of(&self, account: &AccountId) -> Result<u64> {
        self.balance_at(account, self.ctx.now()).await
    }

    pub async fn balance_at(&self, account: &AccountId, as_of: DateTime<Utc>) -> Result<u64> {
        Ok(self.state_at(account, as_of).await?.balance_at(as_of))
    }

    pub async fn tier_of(&self, account: &AccountId) -> Result<Tier> {
        self.tier_at(account, self.ctx.now()).await
    }

    pub async fn tier_at(&self, account: &AccountId, as_of: DateTime<Utc>) -> Result<Tier> {
        let state = self.state_at(account, as_of).await?;
        let policy = self.ctx.config().await.tiers;
        Ok(policy.tier_for(state.lifetime_earned(as_of, policy.window())))
    }

    /// Wallet view: balance, tier progress and soon-to-expire coins
    pub async fn summary(&self, account: &AccountId) -> Result<AccountSummary> {
        let as_of = self.ctx.now();
        let state = self.state_at(account, as_of).await?;
        let config = self.ctx.config().await;
        let policy = &config.tiers;

        let lifetime_earned = state.lifetime_earned(as_of, policy.window());
        let tier = policy.tier_for(lifetime_earned);
        let next_tier = tier.next();
        let coins_to_next_tier =
            next_tier.map(|next| (policy.threshold_of(next) - lifetime_earned).max(0));

        Ok(AccountSummary {
            account_id: account.clone(),
            as_of,
            balance: state.balance_at(as_of),
            tier,
            lifetime_earned,
            next_tier,
            coins_to_next_tier,
            total_redeemed: state.total_redeemed(),
            total_expired: state.total_expired(),
            expiring_soon: state
                .expiring_within(as_of, config.expiring_soon_horizon())
                .iter()
                .map(ExpiringLot::from)
                .collect(),
            version: state.version(),
        })
    }
}

/// Record a freshly loaded state. A newer snapshot cached meanwhile by a
/// concurrent reader wins, but still learns about the checkpoint written here.
fn remember(
    cache: &mut HashMap<AccountId, CachedState>,
    capacity: usize,
    account: &AccountId,
    state: &AccountState,
    persisted_version: u64,
) {
    match cache.get_mut(account) {
        Some(cached) => {
            if cached.state.version() < state.version() {
                cached.state = state.clone();
            }
            cached.persisted_version = cached.persisted_version.max(persisted_version);
        }
        None => {
            if cache.len() >= capacity {
                evict_one(cache, account);
            }
            cache.insert(
                account.clone(),
                CachedState {
                    state: state.clone(),
                    persisted_version,
                },
            );
        }
    }
}

/// Drop one snapshot other than `keep`. The cache only saves replay work, so
/// any victim is safe.
fn evict_one(cache: &mut HashMap<AccountId, CachedState>, keep: &AccountId) {
    let victim = cache.keys().find(|id| *id != keep).cloned();
    if let Some(victim) = victim {
        cache.remove(&victim);
    }
}

async fn cached_is_current<S: LedgerStore>(
    ctx: &LedgerContext<S>,
    account: &AccountId,
    state: &AccountState,
) -> bool {
    ctx.cache
        .read()
        .await
        .get(account)
        .map(|c| c.state.version() == state.version())
        .unwrap_or(false)
}

async fn persist<S: LedgerStore>(
    ctx: &LedgerContext<S>,
    account: &AccountId,
    state: &AccountState,
) -> Result<()> {
    let checkpoint = Checkpoint {
        account_id: account.clone(),
        version: state.version(),
        snapshot: serde_json::to_string(state)?,
    };
    ctx.store.save_checkpoint(&checkpoint).await?;
    debug!("Checkpointed {} at version {}", account, state.version());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use fitcoin_core::{EntryHeader, LedgerEntry, ManualClock, RewardsConfig, SourceEvent};
    use fitcoin_persistence::MemoryLedger;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, 10, 0, 0).unwrap()
    }

    async fn seed(store: &MemoryLedger, account: &AccountId, amounts: &[i64]) {
        for (i, amount) in amounts.iter().enumerate() {
            let seq = i as u64 + 1;
            let at = start() + Duration::minutes(i as i64);
            let header = EntryHeader::new(account.clone(), seq, at);
            let entry = LedgerEntry::earn(header, SourceEvent::Workout, *amount, 12, format!("k{}", seq)).unwrap();
            store.append(&entry, seq - 1).await.unwrap();
        }
    }

    fn window() -> Duration {
        RewardsConfig::default().tiers.window()
    }

    fn make_engine(store: Arc<MemoryLedger>, config: RewardsConfig) -> (BalanceEngine<MemoryLedger>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start() + Duration::hours(1)));
        let ctx = Arc::new(LedgerContext::new(store, config, clock.clone()));
        (BalanceEngine::new(ctx), clock)
    }

    #[tokio::test]
    async fn test_balance_and_tier_from_ledger() {
        let store = Arc::new(MemoryLedger::new());
        let account = AccountId::new("a");
        seed(&store, &account, &[50, 40, 20]).await;

        let (engine, _clock) = make_engine(store, RewardsConfig::default());
        assert_eq!(engine.balance_of(&account).await.unwrap(), 110);
        assert_eq!(engine.tier_of(&account).await.unwrap(), Tier::Silver);
        assert_eq!(engine.balance_of(&AccountId::new("nobody")).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_checkpoint_persisted_and_restored() {
        let store = Arc::new(MemoryLedger::new());
        let account = AccountId::new("a");
        seed(&store, &account, &[5, 5, 5, 5]).await;

        let mut config = RewardsConfig::default();
        config.checkpoint_every = 3;
        let (engine, _clock) = make_engine(store.clone(), config.clone());
        assert_eq!(engine.balance_of(&account).await.unwrap(), 20);

        let checkpoint = store.load_checkpoint(&account).await.unwrap().unwrap();
        assert_eq!(checkpoint.version, 4);

        // A fresh engine resumes from the checkpoint
        let (fresh, _clock) = make_engine(store.clone(), config);
        let state = fresh.state(&account).await.unwrap();
        assert_eq!(state.version(), 4);
        assert_eq!(state.balance_at(start() + Duration::hours(1)), 20);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_falls_back_to_replay() {
        let store = Arc::new(MemoryLedger::new());
        let account = AccountId::new("a");
        seed(&store, &account, &[7, 8]).await;
        store
            .save_checkpoint(&Checkpoint {
                account_id: account.clone(),
                version: 2,
                snapshot: "garbage".to_string(),
            })
            .await
            .unwrap();

        let (engine, _clock) = make_engine(store, RewardsConfig::default());
        assert_eq!(engine.balance_of(&account).await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_historical_query_replays_prefix() {
        let store = Arc::new(MemoryLedger::new());
        let account = AccountId::new("a");
        seed(&store, &account, &[10, 20, 30]).await;

        let (engine, _clock) = make_engine(store, RewardsConfig::default());
        // Warm the cache with the full history first
        assert_eq!(engine.balance_of(&account).await.unwrap(), 60);
        let between = start() + Duration::seconds(90);
        assert_eq!(engine.balance_at(&account, between).await.unwrap(), 30);
    }

    #[tokio::test]
    async fn test_summary_reports_progress_and_expiring_lots() {
        let store = Arc::new(MemoryLedger::new());
        let account = AccountId::new("a");
        seed(&store, &account, &[60, 30]).await;

        let (engine, clock) = make_engine(store, RewardsConfig::default());
        let summary = engine.summary(&account).await.unwrap();
        assert_eq!(summary.balance, 90);
        assert_eq!(summary.tier, Tier::Bronze);
        assert_eq!(summary.next_tier, Some(Tier::Silver));
        assert_eq!(summary.coins_to_next_tier, Some(11));
        assert!(summary.expiring_soon.is_empty());

        clock.set(start() + Duration::days(350));
        let summary = engine.summary(&account).await.unwrap();
        assert_eq!(summary.expiring_soon.len(), 2);
        assert_eq!(summary.expiring_soon[0].remaining, 60);
    }

    #[tokio::test]
    async fn test_cache_stays_within_capacity() {
        let store = Arc::new(MemoryLedger::new());
        for i in 0..10 {
            seed(&store, &AccountId::new(format!("acct-{}", i)), &[5, 7]).await;
        }

        let clock = Arc::new(ManualClock::new(start() + Duration::hours(1)));
        let mut ctx = LedgerContext::new(store, RewardsConfig::default(), clock);
        ctx.cache_capacity = 3;
        let ctx = Arc::new(ctx);
        let engine = BalanceEngine::new(ctx.clone());

        for i in 0..10 {
            let account = AccountId::new(format!("acct-{}", i));
            assert_eq!(engine.balance_of(&account).await.unwrap(), 12);
            assert!(ctx.cache.read().await.len() <= 3);
            assert!(ctx.cache.read().await.contains_key(&account));
        }
        // Evicted accounts are replayed from the store again
        assert_eq!(engine.balance_of(&AccountId::new("acct-0")).await.unwrap(), 12);
    }

    #[test]
    fn test_newer_cached_state_keeps_latest_checkpoint_version() {
        let account = AccountId::new("a");
        let entries: Vec<LedgerEntry> = (1..=5u64)
            .map(|seq| {
                let header = EntryHeader::new(account.clone(), seq, start() + Duration::minutes(seq as i64));
                LedgerEntry::earn(header, SourceEvent::Workout, 1, 12, format!("k{}", seq)).unwrap()
            })
            .collect();
        let at_four = AccountState::replay(entries.iter().take(4), window()).unwrap();
        let at_five = AccountState::replay(entries.iter(), window()).unwrap();

        // A concurrent reader cached version 5 before this load, which
        // checkpointed version 4, got to the cache
        let mut cache = HashMap::new();
        remember(&mut cache, 8, &account, &at_five, 0);
        remember(&mut cache, 8, &account, &at_four, 4);

        let cached = &cache[&account];
        assert_eq!(cached.state.version(), 5);
        assert_eq!(cached.persisted_version, 4);

        // An older checkpoint never rolls the marker back
        remember(&mut cache, 8, &account, &at_four, 2);
        assert_eq!(cache[&account].persisted_version, 4);
    }

    #[tokio::test]
    async fn test_no_redundant_checkpoint_after_lost_cache_race() {
        let store = Arc::new(MemoryLedger::new());
        let account = AccountId::new("a");
        seed(&store, &account, &[1, 1, 1, 1, 1]).await;

        let mut config = RewardsConfig::default();
        config.checkpoint_every = 3;
        let (engine, _clock) = make_engine(store.clone(), config);
        let entries = store.entries_for(&account).await.unwrap();
        let at_five = AccountState::replay(entries.iter(), window()).unwrap();
        store
            .save_checkpoint(&Checkpoint {
                account_id: account.clone(),
                version: 4,
                snapshot: serde_json::to_string(&AccountState::replay(entries.iter().take(4), window()).unwrap()).unwrap(),
            })
            .await
            .unwrap();
        {
            let mut cache = engine.ctx.cache.write().await;
            remember(&mut cache, 8, &account, &at_five, 0);
            remember(&mut cache, 8, &account, &at_five, 4);
        }

        // Version 6 is within checkpoint_every of the recorded 4, so no new write
        let header = EntryHeader::new(account.clone(), 6, start() + Duration::minutes(6));
        let sixth = LedgerEntry::earn(header, SourceEvent::Workout, 1, 12, "k6".into()).unwrap();
        store.append(&sixth, 5).await.unwrap();
        assert_eq!(engine.state(&account).await.unwrap().version(), 6);
        assert_eq!(store.load_checkpoint(&account).await.unwrap().unwrap().version, 4);
    }
}
