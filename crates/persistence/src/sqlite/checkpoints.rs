//! Replay snapshot persistence

use crate::store::Checkpoint;
use fitcoin_core::{AccountId, Error, Result};
use sqlx::SqlitePool;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CheckpointRow {
    pub account_id: String,
    pub version: i64,
    pub snapshot: String,
}

impl From<CheckpointRow> for Checkpoint {
    fn from(row: CheckpointRow) -> Self {
        Checkpoint {
            account_id: AccountId::new(row.account_id),
            version: row.version as u64,
            snapshot: row.snapshot,
        }
    }
}

pub async fn get_checkpoint(pool: &SqlitePool, account: &AccountId) -> Result<Option<Checkpoint>> {
    let row = sqlx::query_as::<_, CheckpointRow>(
        "SELECT account_id, version, snapshot FROM checkpoints WHERE account_id = ?",
    )
    .bind(account.as_str())
    .fetch_optional(pool)
    .await
    .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

    Ok(row.map(Checkpoint::from))
}

/// Upsert, keeping whichever snapshot covers more entries
pub async fn put_checkpoint(pool: &SqlitePool, checkpoint: &Checkpoint) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO checkpoints (account_id, version, snapshot, updated_at)
           VALUES (?, ?, ?, CURRENT_TIMESTAMP)
           ON CONFLICT(account_id) DO UPDATE SET
             version = excluded.version,
             snapshot = excluded.snapshot,
             updated_at = excluded.updated_at
           WHERE excluded.version > checkpoints.version"#,
    )
    .bind(checkpoint.account_id.as_str())
    .bind(checkpoint.version as i64)
    .bind(&checkpoint.snapshot)
    .execute(pool)
    .await
    .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
    Ok(())
}
