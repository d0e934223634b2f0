//! Ledger entry persistence operations

use super::checkpoints::{get_checkpoint, put_checkpoint};
use crate::store::{Checkpoint, LedgerStore};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use fitcoin_core::{AccountId, EntryId, Error, LedgerEntry, Result};
use serde::{Deserialize, Serialize};
use sqlx::pool::PoolConnection;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};

const ENTRY_COLUMNS: &str = "entry_id, account_id, sequence, kind, amount, source_event, \
     created_at, expires_at, reference_entry_id, dedupe_key, note";

/// Ledger entry as stored in the database
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntryRow {
    pub entry_id: String,
    pub account_id: String,
    pub sequence: i64,
    pub kind: String,
    pub amount: i64,
    pub source_event: String,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub reference_entry_id: Option<String>,
    pub dedupe_key: Option<String>,
    pub note: Option<String>,
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::InvalidData(format!("bad timestamp '{}': {}", raw, e)))
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = Error;

    fn try_from(row: LedgerEntryRow) -> Result<Self> {
        Ok(LedgerEntry {
            entry_id: EntryId(row.entry_id),
            account_id: AccountId::new(row.account_id),
            sequence: row.sequence as u64,
            kind: row.kind.parse()?,
            amount: row.amount,
            source_event: row.source_event.parse()?,
            created_at: parse_timestamp(&row.created_at)?,
            expires_at: row.expires_at.as_deref().map(parse_timestamp).transpose()?,
            reference: row.reference_entry_id.map(EntryId),
            dedupe_key: row.dedupe_key,
            note: row.note,
        })
    }
}

/// SQLITE_BUSY (5) or SQLITE_LOCKED (6), including their extended codes
fn is_lock_contention_code(code: &str) -> bool {
    code.parse::<i32>()
        .map(|code| matches!(code & 0xff, 5 | 6))
        .unwrap_or(false)
}

/// Map a failed write onto the ledger's conflict taxonomy. Lock contention is
/// reported as a version conflict so the caller re-reads and retries.
fn classify_write_error(err: sqlx::Error, entry: &LedgerEntry, expected: u64) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.code().is_some_and(|code| is_lock_contention_code(&code)) {
            return Error::AccountVersionConflict {
                account_id: entry.account_id.to_string(),
                expected,
                actual: expected,
            };
        }
        if db_err.is_unique_violation() {
            if db_err.message().contains("dedupe_key") {
                return Error::DuplicateEvent {
                    account_id: entry.account_id.to_string(),
                    dedupe_key: entry.dedupe_key.clone().unwrap_or_default(),
                };
            }
            return Error::AccountVersionConflict {
                account_id: entry.account_id.to_string(),
                expected,
                actual: expected + 1,
            };
        }
    }
    Error::StoreUnavailable(err.to_string())
}

/// Pooled connection inside `BEGIN IMMEDIATE`. Dropped before a successful
/// COMMIT or ROLLBACK, the connection is detached and closed, which discards
/// the open transaction instead of handing it back to the pool.
struct WriteTx {
    conn: Option<PoolConnection<Sqlite>>,
}

impl WriteTx {
    async fn begin(pool: &SqlitePool) -> std::result::Result<Self, sqlx::Error> {
        let mut conn = pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(Self { conn: Some(conn) })
    }

    fn conn(&mut self) -> Result<&mut SqliteConnection> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| Error::StoreUnavailable("write transaction already finished".into()))
    }

    async fn finish(mut self, statement: &str) -> std::result::Result<(), sqlx::Error> {
        if let Some(conn) = self.conn.as_deref_mut() {
            sqlx::query(statement).execute(conn).await?;
        }
        // Clean end of transaction: hand the connection back to the pool
        self.conn = None;
        Ok(())
    }
}

impl Drop for WriteTx {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.detach());
        }
    }
}

/// Version check and insert, run inside the caller's write transaction
async fn insert_if_current(conn: &mut SqliteConnection, entry: &LedgerEntry, expected: u64) -> Result<()> {
    let (current,): (i64,) = sqlx::query_as(
        "SELECT COALESCE(MAX(sequence), 0) FROM ledger_entries WHERE account_id = ?",
    )
    .bind(entry.account_id.as_str())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| classify_write_error(e, entry, expected))?;

    let current = current as u64;
    if current != expected || entry.sequence != expected + 1 {
        return Err(Error::AccountVersionConflict {
            account_id: entry.account_id.to_string(),
            expected,
            actual: current,
        });
    }

    // The UNIQUE indexes back both checks as well
    sqlx::query(
        r#"
        INSERT INTO ledger_entries (entry_id, account_id, sequence, kind, amount, source_event,
                                    created_at, expires_at, reference_entry_id, dedupe_key, note)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.entry_id.as_str())
    .bind(entry.account_id.as_str())
    .bind(entry.sequence as i64)
    .bind(entry.kind.as_str())
    .bind(entry.amount)
    .bind(entry.source_event.as_str())
    .bind(format_timestamp(&entry.created_at))
    .bind(entry.expires_at.as_ref().map(format_timestamp))
    .bind(entry.reference.as_ref().map(|r| r.as_str().to_string()))
    .bind(entry.dedupe_key.as_deref())
    .bind(entry.note.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(|e| classify_write_error(e, entry, expected))?;

    Ok(())
}

/// SQLite-backed ledger store
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for SqliteLedger {
    async fn append(&self, entry: &LedgerEntry, expected_version: u64) -> Result<()> {
        // Take the write lock up front so concurrent writers queue on
        // busy_timeout rather than failing a deferred lock upgrade
        let mut tx = WriteTx::begin(&self.pool)
            .await
            .map_err(|e| classify_write_error(e, entry, expected_version))?;

        let outcome = insert_if_current(tx.conn()?, entry, expected_version).await;
        match outcome {
            Ok(()) => tx
                .finish("COMMIT")
                .await
                .map_err(|e| classify_write_error(e, entry, expected_version)),
            Err(err) => {
                // If ROLLBACK fails the drop guard closes the connection,
                // which discards the transaction just the same
                tx.finish("ROLLBACK").await.ok();
                Err(err)
            }
        }
    }

    async fn entries_since(&self, account: &AccountId, after_sequence: u64) -> Result<Vec<LedgerEntry>> {
        let query = format!(
            "SELECT {} FROM ledger_entries WHERE account_id = ? AND sequence > ? ORDER BY sequence ASC",
            ENTRY_COLUMNS
        );
        let rows = sqlx::query_as::<_, LedgerEntryRow>(&query)
            .bind(account.as_str())
            .bind(after_sequence as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        rows.into_iter().map(LedgerEntry::try_from).collect()
    }

    async fn find_by_dedupe_key(&self, account: &AccountId, key: &str) -> Result<Option<LedgerEntry>> {
        let query = format!(
            "SELECT {} FROM ledger_entries WHERE account_id = ? AND dedupe_key = ?",
            ENTRY_COLUMNS
        );
        let row = sqlx::query_as::<_, LedgerEntryRow>(&query)
            .bind(account.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        row.map(LedgerEntry::try_from).transpose()
    }

    async fn version(&self, account: &AccountId) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COALESCE(MAX(sequence), 0) FROM ledger_entries WHERE account_id = ?",
        )
        .bind(account.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        Ok(row.0 as u64)
    }

    async fn accounts(&self) -> Result<Vec<AccountId>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT account_id FROM ledger_entries ORDER BY account_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        Ok(rows.into_iter().map(|r| AccountId::new(r.0)).collect())
    }

    async fn load_checkpoint(&self, account: &AccountId) -> Result<Option<Checkpoint>> {
        get_checkpoint(&self.pool, account).await
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        put_checkpoint(&self.pool, checkpoint).await
    }
}
