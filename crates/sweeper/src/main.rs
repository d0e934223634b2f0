//! FitCoin Sweeper - runs the periodic expiry sweep against the local ledger

use anyhow::Context;
use fitcoin_core::RewardsConfig;
use fitcoin_engine::expiry::DEFAULT_SWEEP_INTERVAL_SECS;
use fitcoin_engine::{spawn_expiry_sweeper, RewardsLedger};
use fitcoin_persistence::sqlite::{load_rewards_config, save_rewards_config};
use fitcoin_persistence::Database;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn data_dir() -> PathBuf {
    std::env::var_os("FITCOIN_DATA_DIR")
        .map(PathBuf::from)
        .or_else(|| dirs_next::data_local_dir().map(|p| p.join("FitCoin")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn sweep_interval_secs() -> u64 {
    match std::env::var("FITCOIN_SWEEP_INTERVAL_SECS") {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(secs) if secs > 0 => secs,
            _ => {
                tracing::warn!(
                    "Ignoring invalid FITCOIN_SWEEP_INTERVAL_SECS={:?}, using {}s",
                    raw,
                    DEFAULT_SWEEP_INTERVAL_SECS
                );
                DEFAULT_SWEEP_INTERVAL_SECS
            }
        },
        Err(_) => DEFAULT_SWEEP_INTERVAL_SECS,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fitcoin_sweeper=info,fitcoin_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting FitCoin sweeper");

    let db_path = data_dir().join("fitcoin.db");
    let db = Database::connect(&db_path)
        .await
        .with_context(|| format!("opening ledger database at {}", db_path.display()))?;
    tracing::info!("Ledger database: {}", db_path.display());

    let config = match load_rewards_config(db.pool()).await? {
        Some(config) => config,
        None => {
            let config = RewardsConfig::default();
            save_rewards_config(db.pool(), &config).await?;
            tracing::info!("No rewards configuration stored, saved defaults");
            config
        }
    };

    let ledger = RewardsLedger::new(Arc::new(db.ledger()), config)
        .context("rewards configuration is invalid")?;
    let handle = spawn_expiry_sweeper(ledger.sweeper(), sweep_interval_secs());

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    handle.stop().await;

    if let Some(report) = handle.last_report().await {
        tracing::info!(
            "Last sweep expired {} FitCoins across {} lots ({} accounts failed)",
            report.fitcoins_expired,
            report.entries_expired,
            report.accounts_failed
        );
    }
    tracing::info!("FitCoin sweeper stopped");
    Ok(())
}
