//! Rewards configuration
//!
//! Earning rates, tier thresholds and the checkout conversion rate are product
//! decisions, so they live here instead of in the ledger logic. Every field
//! has a serde default so a partial JSON document from the settings table
//! still loads.

use crate::errors::{Error, Result};
use crate::models::{SourceEvent, Tier};
use crate::types::MinorUnits;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Base FitCoin amounts per activity, before the tier multiplier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateTable {
    #[serde(default = "default_workout")]
    pub workout: i64,
    #[serde(default = "default_streak")]
    pub streak: i64,
    #[serde(default = "default_referral")]
    pub referral: i64,
    #[serde(default = "default_purchase")]
    pub purchase: i64,
    /// Indexed by 1-based milestone number
    #[serde(default = "default_challenge_milestones")]
    pub challenge_milestones: Vec<i64>,
}

fn default_workout() -> i64 { 10 }
fn default_streak() -> i64 { 5 }
fn default_referral() -> i64 { 25 }
fn default_purchase() -> i64 { 10 }
fn default_challenge_milestones() -> Vec<i64> { vec![50, 60, 70] }

impl Default for RateTable {
    fn default() -> Self {
        Self {
            workout: default_workout(),
            streak: default_streak(),
            referral: default_referral(),
            purchase: default_purchase(),
            challenge_milestones: default_challenge_milestones(),
        }
    }
}

impl RateTable {
    /// Base amount for an earnable source. Challenges use `milestone`
    /// (defaulting to the first one).
    pub fn base_amount(&self, source: SourceEvent, milestone: Option<u32>) -> Result<i64> {
        let amount = match source {
            SourceEvent::Workout => self.workout,
            SourceEvent::Streak => self.streak,
            SourceEvent::Referral => self.referral,
            SourceEvent::Purchase => self.purchase,
            SourceEvent::Challenge => {
                let index = milestone.unwrap_or(1);
                index
                    .checked_sub(1)
                    .and_then(|i| self.challenge_milestones.get(i as usize))
                    .copied()
                    .ok_or_else(|| {
                        Error::InvalidEventKind(format!("challenge milestone {}", index))
                    })?
            }
            other => return Err(Error::InvalidEventKind(other.to_string())),
        };

        if amount <= 0 {
            return Err(Error::InvalidEventKind(format!("{} has no earning rate", source)));
        }
        Ok(amount)
    }
}

/// Tier thresholds and earning multipliers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierPolicy {
    /// Lowest lifetime total for Silver, Gold, Platinum
    #[serde(default = "default_thresholds")]
    pub thresholds: [i64; 3],
    /// Earning multiplier per tier in percent (100 = 1.0x)
    #[serde(default = "default_multipliers")]
    pub multiplier_percent: [u32; 4],
    /// Trailing window for the lifetime-earned total
    #[serde(default = "default_window_days")]
    pub window_days: u32,
}

fn default_thresholds() -> [i64; 3] { [101, 501, 1001] }
fn default_multipliers() -> [u32; 4] { [100, 120, 150, 200] }
fn default_window_days() -> u32 { 365 }

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            thresholds: default_thresholds(),
            multiplier_percent: default_multipliers(),
            window_days: default_window_days(),
        }
    }
}

impl TierPolicy {
    pub fn tier_for(&self, lifetime_earned: i64) -> Tier {
        let [silver, gold, platinum] = self.thresholds;
        if lifetime_earned >= platinum {
            Tier::Platinum
        } else if lifetime_earned >= gold {
            Tier::Gold
        } else if lifetime_earned >= silver {
            Tier::Silver
        } else {
            Tier::Bronze
        }
    }

    /// Lifetime total needed to reach `tier`
    pub fn threshold_of(&self, tier: Tier) -> i64 {
        match tier {
            Tier::Bronze => 0,
            other => self.thresholds[other.index() - 1],
        }
    }

    /// `base` scaled by the tier multiplier, rounded down
    pub fn apply_multiplier(&self, tier: Tier, base: i64) -> i64 {
        base * i64::from(self.multiplier_percent[tier.index()]) / 100
    }

    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.window_days))
    }
}

/// How many FitCoins buy how much currency at checkout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRate {
    #[serde(default = "default_conversion_fitcoins")]
    pub fitcoins: i64,
    #[serde(default = "default_conversion_minor_units")]
    pub minor_units: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_conversion_fitcoins() -> i64 { 5 }
fn default_conversion_minor_units() -> i64 { 965 }
fn default_currency() -> String { "INR".to_string() }

impl Default for ConversionRate {
    fn default() -> Self {
        Self {
            fitcoins: default_conversion_fitcoins(),
            minor_units: default_conversion_minor_units(),
            currency: default_currency(),
        }
    }
}

impl ConversionRate {
    /// Currency value of `fitcoins`, rounded down to the minor unit.
    ///
    /// Fails with `InvalidAmount` when the value doesn't fit in an `i64`.
    pub fn value_of(&self, fitcoins: i64) -> Result<MinorUnits> {
        if self.fitcoins <= 0 {
            return Ok(MinorUnits(0));
        }
        let value = i128::from(fitcoins) * i128::from(self.minor_units) / i128::from(self.fitcoins);
        i64::try_from(value)
            .map(MinorUnits)
            .map_err(|_| Error::InvalidAmount(fitcoins))
    }
}

/// Top-level configuration for the rewards ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RewardsConfig {
    #[serde(default)]
    pub rates: RateTable,
    #[serde(default)]
    pub tiers: TierPolicy,
    /// Validity of earned lots
    #[serde(default = "default_expiry_months")]
    pub expiry_months: u32,
    /// Max FitCoins usable per product
    #[serde(default)]
    pub product_caps: HashMap<String, i64>,
    /// Cap for products not listed in `product_caps`; `None` rejects them
    #[serde(default)]
    pub default_product_cap: Option<i64>,
    #[serde(default)]
    pub conversion: ConversionRate,
    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,
    /// Version-conflict retries before giving up with a timeout
    #[serde(default = "default_max_conflict_retries")]
    pub max_conflict_retries: u32,
    /// Sources credited at most once per account per UTC day
    #[serde(default = "default_once_per_day")]
    pub once_per_day: Vec<SourceEvent>,
    /// Persist a replay snapshot every N entries (0 disables)
    #[serde(default = "default_checkpoint_every")]
    pub checkpoint_every: u64,
    #[serde(default = "default_expiring_soon_days")]
    pub expiring_soon_days: u32,
}

fn default_expiry_months() -> u32 { 12 }
fn default_operation_timeout_ms() -> u64 { 5000 }
fn default_max_conflict_retries() -> u32 { 3 }
fn default_once_per_day() -> Vec<SourceEvent> { vec![SourceEvent::Streak] }
fn default_checkpoint_every() -> u64 { 64 }
fn default_expiring_soon_days() -> u32 { 30 }

impl Default for RewardsConfig {
    fn default() -> Self {
        Self {
            rates: RateTable::default(),
            tiers: TierPolicy::default(),
            expiry_months: default_expiry_months(),
            product_caps: HashMap::new(),
            default_product_cap: None,
            conversion: ConversionRate::default(),
            operation_timeout_ms: default_operation_timeout_ms(),
            max_conflict_retries: default_max_conflict_retries(),
            once_per_day: default_once_per_day(),
            checkpoint_every: default_checkpoint_every(),
            expiring_soon_days: default_expiring_soon_days(),
        }
    }
}

impl RewardsConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Reject tables that would break tier monotonicity or mint negative coins
    pub fn validate(&self) -> Result<()> {
        let [silver, gold, platinum] = self.tiers.thresholds;
        if !(0 < silver && silver < gold && gold < platinum) {
            return Err(Error::InvalidData(format!(
                "tier thresholds must be strictly increasing: {:?}",
                self.tiers.thresholds
            )));
        }
        if self.tiers.multiplier_percent.windows(2).any(|w| w[0] > w[1]) {
            return Err(Error::InvalidData(
                "tier multipliers must be non-decreasing".to_string(),
            ));
        }
        if self.expiry_months == 0 {
            return Err(Error::InvalidData("expiry_months must be positive".to_string()));
        }
        if self.product_caps.values().any(|cap| *cap < 0) {
            return Err(Error::InvalidData("product caps must be non-negative".to_string()));
        }
        Ok(())
    }

    /// Discount cap for a product; `None` when the product can't take FitCoins
    pub fn product_cap(&self, product_id: &str) -> Option<i64> {
        self.product_caps
            .get(product_id)
            .copied()
            .or(self.default_product_cap)
    }

    pub fn is_once_per_day(&self, source: SourceEvent) -> bool {
        self.once_per_day.contains(&source)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn expiring_soon_horizon(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.expiring_soon_days))
    }
}
