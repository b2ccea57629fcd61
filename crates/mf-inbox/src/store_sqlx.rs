//! SQLite-backed [`InboxStore`]. The unique primary key on `id` is what
//! gives the dedup check its "store's uniqueness guarantee" under
//! concurrent admission: a losing racer's `INSERT` simply fails.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use mf_core::{MessageId, MessagingError};

use crate::entry::InboxEntry;
use crate::store::InboxStore;

pub struct SqlxInboxStore {
    pool: SqlitePool,
}

impl SqlxInboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mf_inbox_entries (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                type_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                received_at TEXT NOT NULL,
                processed_at TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                error TEXT,
                correlation_id TEXT,
                causation_id TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS mf_inbox_entries_cleanup_idx ON mf_inbox_entries (status, processed_at)")
            .execute(pool)
            .await?;
        Ok(())
    }
}

fn sqlx_err(e: sqlx::Error) -> MessagingError {
    MessagingError::Handler(anyhow::anyhow!(e))
}

#[async_trait]
impl InboxStore for SqlxInboxStore {
    async fn try_admit(&self, entry: InboxEntry, window: StdDuration) -> Result<bool, MessagingError> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;

        let existing = sqlx::query("SELECT received_at FROM mf_inbox_entries WHERE id = ?")
            .bind(entry.id.0.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_err)?;

        if let Some(row) = existing {
            let received_at: DateTime<Utc> = row.try_get("received_at").map_err(sqlx_err)?;
            let age = entry.received_at.signed_duration_since(received_at);
            if age <= chrono::Duration::from_std(window).unwrap_or_default() {
                tx.commit().await.map_err(sqlx_err)?;
                return Ok(false);
            }
            sqlx::query("DELETE FROM mf_inbox_entries WHERE id = ?")
                .bind(entry.id.0.to_string())
                .execute(&mut *tx)
                .await
                .map_err(sqlx_err)?;
        }

        let payload = serde_json::to_string(&entry.payload).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        sqlx::query(
            "INSERT INTO mf_inbox_entries (id, source, type_name, payload, received_at, status, correlation_id, causation_id)
             VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(entry.id.0.to_string())
        .bind(&entry.source)
        .bind(&entry.type_name)
        .bind(payload)
        .bind(entry.received_at)
        .bind(entry.correlation_id.map(|c| c.0.to_string()))
        .bind(entry.causation_id.map(|c| c.0.to_string()))
        .execute(&mut *tx)
        .await
        .map_err(sqlx_err)?;

        tx.commit().await.map_err(sqlx_err)?;
        Ok(true)
    }

    async fn mark_processed(&self, id: MessageId, at: DateTime<Utc>) -> Result<(), MessagingError> {
        sqlx::query("UPDATE mf_inbox_entries SET status = 'processed', processed_at = ? WHERE id = ?")
            .bind(at)
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn mark_failed(&self, id: MessageId, error: String) -> Result<(), MessagingError> {
        sqlx::query("UPDATE mf_inbox_entries SET status = 'failed', error = ? WHERE id = ?")
            .bind(error)
            .bind(id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn cleanup_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MessagingError> {
        let result = sqlx::query("DELETE FROM mf_inbox_entries WHERE status = 'processed' AND processed_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(result.rows_affected())
    }
}
