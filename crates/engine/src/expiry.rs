//! Expiry Sweep
//!
//! Writes off the unconsumed remainder of every lot past its expiry with an
//! explicit Expire entry. Balances already exclude lapsed lots, so the sweep
//! only makes the write-off visible in history; running it twice for the same
//! instant appends nothing the second time.

use crate::context::LedgerContext;
use crate::balance::BalanceEngine;
use chrono::{DateTime, Utc};
use fitcoin_core::{AccountId, EntryHeader, Error, LedgerEntry, Result, SweepReport};
use fitcoin_persistence::LedgerStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Default sweep interval: once a day
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 86_400;

pub struct ExpirySweeper<S> {
    ctx: Arc<LedgerContext<S>>,
}

impl<S> Clone for ExpirySweeper<S> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<S: LedgerStore> ExpirySweeper<S> {
    pub(crate) fn new(ctx: Arc<LedgerContext<S>>) -> Self {
        Self { ctx }
    }

    /// Expire every lapsed lot across all accounts as of `as_of`.
    ///
    /// A failing account is logged and counted in `accounts_failed`; the sweep
    /// carries on with the rest. Only failing to list accounts aborts.
    pub async fn run_expiry_sweep(&self, as_of: DateTime<Utc>) -> Result<SweepReport> {
        let now = self.ctx.now();
        if as_of > now {
            return Err(Error::InvalidData(format!(
                "cannot sweep ahead of the clock ({} > {})",
                as_of.to_rfc3339(),
                now.to_rfc3339()
            )));
        }

        let accounts = self.ctx.store.accounts().await?;
        let mut report = SweepReport {
            as_of: Some(as_of),
            ..SweepReport::default()
        };

        for account in &accounts {
            report.accounts_scanned += 1;
            match self.sweep_account(account, as_of).await {
                Ok((entries, coins)) => {
                    report.entries_expired += entries;
                    report.fitcoins_expired += coins;
                }
                Err(e) => {
                    warn!("Expiry sweep failed for {}: {}", account, e);
                    report.accounts_failed += 1;
                }
            }
        }

        info!(
            "Expiry sweep as of {}: {} accounts, {} lots, {} FitCoins expired, {} failed",
            as_of.to_rfc3339(),
            report.accounts_scanned,
            report.entries_expired,
            report.fitcoins_expired,
            report.accounts_failed
        );
        Ok(report)
    }

    /// Append Expire entries for one account; returns (entries, FitCoins)
    async fn sweep_account(&self, account: &AccountId, as_of: DateTime<Utc>) -> Result<(u32, i64)> {
        let config = self.ctx.config().await;
        let retries = config.max_conflict_retries;
        let ctx = &self.ctx;

        ctx.with_deadline(config.operation_timeout(), "expiry sweep", async {
            let _guard = ctx.locks.acquire(account).await;
            let mut expired_entries = 0u32;
            let mut expired_coins = 0i64;

            for _ in 0..=retries {
                let state = BalanceEngine::load_state(ctx, account).await?;
                let mut pending = state.pending_expiries(as_of);
                if pending.is_empty() {
                    return Ok((expired_entries, expired_coins));
                }
                pending.sort_by(|a, b| {
                    a.expires_at
                        .cmp(&b.expires_at)
                        .then_with(|| a.entry_id.cmp(&b.entry_id))
                });

                let created_at = match state.last_created_at() {
                    Some(last) if last > as_of => last,
                    _ => as_of,
                };

                let mut version = state.version();
                let mut interrupted = false;
                for lot in &pending {
                    let header = EntryHeader::new(account.clone(), version + 1, created_at);
                    let entry = LedgerEntry::expire(header, &lot.entry_id, lot.remaining)?;
                    match ctx.store.append(&entry, version).await {
                        Ok(()) => {
                            version += 1;
                            expired_entries += 1;
                            expired_coins += lot.remaining;
                            debug!("Expired {} FitCoins from lot {}", lot.remaining, lot.entry_id);
                        }
                        // Another writer moved the account on, or already expired
                        // this lot; reload and continue with whatever is left
                        Err(Error::AccountVersionConflict { .. }) | Err(Error::DuplicateEvent { .. }) => {
                            interrupted = true;
                            break;
                        }
                        Err(e) => return Err(e),
                    }
                }

                if !interrupted {
                    return Ok((expired_entries, expired_coins));
                }
            }

            Err(Error::Timeout(format!(
                "expiry sweep for {} still conflicting after {} attempts",
                account,
                retries + 1
            )))
        })
        .await
    }
}

/// Status of the background sweeper
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SweeperStatus {
    Running,
    Paused,
    Stopped,
}

/// Handle to control a sweeper spawned with [`spawn_expiry_sweeper`]
#[derive(Clone)]
pub struct ExpirySweeperHandle {
    pause_tx: watch::Sender<bool>,
    cancel_token: CancellationToken,
    status: Arc<RwLock<SweeperStatus>>,
    interval_secs: Arc<RwLock<u64>>,
    last_report: Arc<RwLock<Option<SweepReport>>>,
}

impl ExpirySweeperHandle {
    pub async fn pause(&self) {
        let _ = self.pause_tx.send(true);
        *self.status.write().await = SweeperStatus::Paused;
        info!("Expiry sweeper paused");
    }

    pub async fn resume(&self) {
        let _ = self.pause_tx.send(false);
        *self.status.write().await = SweeperStatus::Running;
        info!("Expiry sweeper resumed");
    }

    /// Stop for good; spawn a new sweeper to restart
    pub async fn stop(&self) {
        self.cancel_token.cancel();
        *self.status.write().await = SweeperStatus::Stopped;
        info!("Expiry sweeper stopped");
    }

    pub async fn status(&self) -> SweeperStatus {
        *self.status.read().await
    }

    pub fn is_paused(&self) -> bool {
        *self.pause_tx.borrow()
    }

    pub async fn set_interval(&self, secs: u64) {
        *self.interval_secs.write().await = secs.max(1);
        info!("Expiry sweep interval set to {}s", secs.max(1));
    }

    pub async fn interval(&self) -> u64 {
        *self.interval_secs.read().await
    }

    /// Report of the most recent completed sweep
    pub async fn last_report(&self) -> Option<SweepReport> {
        self.last_report.read().await.clone()
    }
}

/// Spawn the periodic expiry sweep. The first sweep runs immediately.
pub fn spawn_expiry_sweeper<S>(sweeper: ExpirySweeper<S>, interval_secs: u64) -> ExpirySweeperHandle
where
    S: LedgerStore + 'static,
{
    let (pause_tx, pause_rx) = watch::channel(false);
    let cancel_token = CancellationToken::new();
    let status = Arc::new(RwLock::new(SweeperStatus::Running));
    let interval_secs = Arc::new(RwLock::new(interval_secs.max(1)));
    let last_report = Arc::new(RwLock::new(None));

    let handle = ExpirySweeperHandle {
        pause_tx,
        cancel_token: cancel_token.clone(),
        status,
        interval_secs: interval_secs.clone(),
        last_report: last_report.clone(),
    };

    tokio::spawn(sweeper_loop(sweeper, pause_rx, cancel_token, interval_secs, last_report));

    handle
}

async fn sweeper_loop<S: LedgerStore>(
    sweeper: ExpirySweeper<S>,
    mut pause_rx: watch::Receiver<bool>,
    cancel_token: CancellationToken,
    interval_secs: Arc<RwLock<u64>>,
    last_report: Arc<RwLock<Option<SweepReport>>>,
) {
    info!("Expiry sweeper started (interval: {}s)", *interval_secs.read().await);

    let mut due = true;
    loop {
        if due && !*pause_rx.borrow() {
            let as_of = sweeper.ctx.now();
            match sweeper.run_expiry_sweep(as_of).await {
                Ok(report) => *last_report.write().await = Some(report),
                Err(e) => error!("Expiry sweep error: {}", e),
            }
        }
        due = false;

        let current_interval = *interval_secs.read().await;
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("Expiry sweeper cancelled, exiting");
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(current_interval)) => {
                due = true;
            }
            changed = pause_rx.changed() => {
                if changed.is_err() {
                    debug!("Expiry sweeper handle dropped, exiting");
                    break;
                }
                debug!("Expiry sweeper pause state changed: paused={}", *pause_rx.borrow());
            }
        }
    }
}
