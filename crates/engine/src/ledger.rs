//! Rewards ledger facade
//!
//! Wires the ingestor, balance engine, redemption authority and expiry sweep
//! around one store, one clock and one set of account locks.

use crate::balance::BalanceEngine;
use crate::context::LedgerContext;
use crate::expiry::ExpirySweeper;
use crate::ingestor::EventIngestor;
use crate::redemption::RedemptionAuthority;
use chrono::{DateTime, Utc};
use fitcoin_core::{
    AccountId, AccountSummary, ActivityEvent, Clock, Discount, Ingested, ManualAdjustment,
    Redemption, RedemptionRequest, Result, RewardsConfig, SweepReport, SystemClock, Tier,
};
use fitcoin_persistence::LedgerStore;
use std::sync::Arc;
use tracing::info;

pub struct RewardsLedger<S> {
    ctx: Arc<LedgerContext<S>>,
    ingestor: EventIngestor<S>,
    balances: BalanceEngine<S>,
    redemptions: RedemptionAuthority<S>,
    sweeper: ExpirySweeper<S>,
}

impl<S> Clone for RewardsLedger<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
            ingestor: self.ingestor.clone(),
            balances: self.balances.clone(),
            redemptions: self.redemptions.clone(),
            sweeper: self.sweeper.clone(),
        }
    }
}

impl<S: LedgerStore> RewardsLedger<S> {
    pub fn new(store: Arc<S>, config: RewardsConfig) -> Result<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, config: RewardsConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;
        let ctx = Arc::new(LedgerContext::new(store, config, clock));
        Ok(Self {
            ingestor: EventIngestor::new(ctx.clone()),
            balances: BalanceEngine::new(ctx.clone()),
            redemptions: RedemptionAuthority::new(ctx.clone()),
            sweeper: ExpirySweeper::new(ctx.clone()),
            ctx,
        })
    }

    pub fn ingestor(&self) -> EventIngestor<S> {
        self.ingestor.clone()
    }

    pub fn balances(&self) -> BalanceEngine<S> {
        self.balances.clone()
    }

    pub fn redemptions(&self) -> RedemptionAuthority<S> {
        self.redemptions.clone()
    }

    pub fn sweeper(&self) -> ExpirySweeper<S> {
        self.sweeper.clone()
    }

    pub fn store(&self) -> Arc<S> {
        self.ctx.store.clone()
    }

    pub async fn config(&self) -> RewardsConfig {
        self.ctx.config().await
    }

    /// Swap in a new configuration. Cached replay state is dropped since the
    /// tier window it was pruned against may have changed.
    pub async fn set_config(&self, config: RewardsConfig) -> Result<()> {
        config.validate()?;
        *self.ctx.config.write().await = config;
        self.ctx.cache.write().await.clear();
        info!("Rewards configuration updated");
        Ok(())
    }

    pub async fn submit(&self, event: &ActivityEvent) -> Result<Ingested> {
        self.ingestor.submit(event).await
    }

    pub async fn adjust(&self, adjustment: &ManualAdjustment) -> Result<Ingested> {
        self.ingestor.adjust(adjustment).await
    }

    pub async fn redeem(&self, request: &RedemptionRequest) -> Result<Redemption> {
        self.redemptions.redeem(request).await
    }

    pub async fn quote_discount(&self, fitcoins: i64) -> Result<Discount> {
        self.redemptions.quote_discount(fitcoins).await
    }

    pub async fn balance_of(&self, account: &AccountId) -> Result<u64> {
        self.balances.balance_of(account).await
    }

    pub async fn balance_at(&self, account: &AccountId, as_of: DateTime<Utc>) -> Result<u64> {
        self.balances.balance_at(account, as_of).await
    }

    pub async fn tier_of(&self, account: &AccountId) -> Result<Tier> {
        self.balances.tier_of(account).await
    }

    pub async fn tier_at(&self, account: &AccountId, as_of: DateTime<Utc>) -> Result<Tier> {
        self.balances.tier_at(account, as_of).await
    }

    pub async fn summary(&self, account: &AccountId) -> Result<AccountSummary> {
        self.balances.summary(account).await
    }

    pub async fn run_expiry_sweep(&self, as_of: DateTime<Utc>) -> Result<SweepReport> {
        self.sweeper.run_expiry_sweep(as_of).await
    }
}
