//! Key/value settings, including the persisted rewards configuration

use fitcoin_core::{Error, Result, RewardsConfig};
use sqlx::SqlitePool;

const REWARDS_CONFIG_KEY: &str = "rewards_config";

pub async fn get_setting(pool: &SqlitePool, key: &str) -> Result<Option<String>> {
    sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(|e| Error::StoreUnavailable(e.to_string()))
}

pub async fn set_setting(pool: &SqlitePool, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = ?2",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await
    .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
    Ok(())
}

/// Load the persisted rewards configuration, if one was saved
pub async fn load_rewards_config(pool: &SqlitePool) -> Result<Option<RewardsConfig>> {
    match get_setting(pool, REWARDS_CONFIG_KEY).await? {
        Some(json) => Ok(Some(RewardsConfig::from_json(&json)?)),
        None => Ok(None),
    }
}

pub async fn save_rewards_config(pool: &SqlitePool, config: &RewardsConfig) -> Result<()> {
    config.validate()?;
    set_setting(pool, REWARDS_CONFIG_KEY, &config.to_json()?).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    #[tokio::test]
    async fn test_rewards_config_roundtrip_through_settings() {
        let db = Database::connect_in_memory().await.unwrap();
        assert!(load_rewards_config(db.pool()).await.unwrap().is_none());

        let mut config = RewardsConfig::default();
        config.product_caps.insert("yoga-mat".to_string(), 40);
        config.rates.workout = 12;
        save_rewards_config(db.pool(), &config).await.unwrap();

        let loaded = load_rewards_config(db.pool()).await.unwrap().unwrap();
        assert_eq!(loaded, config);
    }

    #[tokio::test]
    async fn test_corrupt_config_surfaces_invalid_data() {
        let db = Database::connect_in_memory().await.unwrap();
        set_setting(db.pool(), REWARDS_CONFIG_KEY, "{not json").await.unwrap();
        assert!(matches!(
            load_rewards_config(db.pool()).await,
            Err(Error::InvalidData(_))
        ));
    }
}
