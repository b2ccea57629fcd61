//! SQLite-backed [`OutboxStore`], giving the outbox the durability it
//! exists for — entries must survive a crash between the business
//! transaction that created them and the background dispatch that
//! publishes them.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use mf_core::{CorrelationId, MessageId, MessagingError};

use crate::entry::{OutboxEntry, OutboxStatus};
use crate::store::OutboxStore;

pub struct SqlxOutboxStore {
    pool: SqlitePool,
}

impl SqlxOutboxStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mf_outbox_entries (
                id TEXT PRIMARY KEY,
                type_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                priority INTEGER NOT NULL,
                enqueued_at TEXT NOT NULL,
                next_retry_at TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL,
                retry_delay_ms INTEGER,
                destination TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                correlation_id TEXT,
                causation_id TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS mf_outbox_entries_poll_idx ON mf_outbox_entries (status, next_retry_at, priority, enqueued_at)")
            .execute(pool)
            .await?;
        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<OutboxEntry, MessagingError> {
        let id: String = row.try_get("id").map_err(sqlx_err)?;
        let payload: String = row.try_get("payload").map_err(sqlx_err)?;
        let status: String = row.try_get("status").map_err(sqlx_err)?;
        let retry_delay_ms: Option<i64> = row.try_get("retry_delay_ms").map_err(sqlx_err)?;
        let correlation_id: Option<String> = row.try_get("correlation_id").map_err(sqlx_err)?;
        let causation_id: Option<String> = row.try_get("causation_id").map_err(sqlx_err)?;
        let retry_count: i64 = row.try_get("retry_count").map_err(sqlx_err)?;
        let max_retries: i64 = row.try_get("max_retries").map_err(sqlx_err)?;

        Ok(OutboxEntry {
            id: Uuid::parse_str(&id).map_err(|e| MessagingError::Configuration(e.to_string()))?,
            type_name: row.try_get("type_name").map_err(sqlx_err)?,
            payload: serde_json::from_str(&payload).map_err(|e| MessagingError::Configuration(e.to_string()))?,
            priority: row.try_get("priority").map_err(sqlx_err)?,
            enqueued_at: row.try_get("enqueued_at").map_err(sqlx_err)?,
            next_retry_at: row.try_get("next_retry_at").map_err(sqlx_err)?,
            retry_count: retry_count as u32,
            max_retries: max_retries as u32,
            retry_delay: retry_delay_ms.map(|ms| StdDuration::from_millis(ms as u64)),
            destination: row.try_get("destination").map_err(sqlx_err)?,
            status: match status.as_str() {
                "processing" => OutboxStatus::Processing,
                "completed" => OutboxStatus::Completed,
                "failed" => OutboxStatus::Failed,
                _ => OutboxStatus::Pending,
            },
            correlation_id: correlation_id
                .map(|s| Uuid::parse_str(&s).map(CorrelationId))
                .transpose()
                .map_err(|e| MessagingError::Configuration(e.to_string()))?,
            causation_id: causation_id
                .map(|s| Uuid::parse_str(&s).map(MessageId))
                .transpose()
                .map_err(|e| MessagingError::Configuration(e.to_string()))?,
        })
    }
}

fn sqlx_err(e: sqlx::Error) -> MessagingError {
    MessagingError::Handler(anyhow::anyhow!(e))
}

#[async_trait]
impl OutboxStore for SqlxOutboxStore {
    async fn add(&self, entry: OutboxEntry) -> Result<(), MessagingError> {
        let payload = serde_json::to_string(&entry.payload).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        sqlx::query(
            "INSERT INTO mf_outbox_entries
             (id, type_name, payload, priority, enqueued_at, next_retry_at, retry_count, max_retries, retry_delay_ms, destination, status, correlation_id, causation_id)
             VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?, 'pending', ?, ?)",
        )
        .bind(entry.id.to_string())
        .bind(&entry.type_name)
        .bind(payload)
        .bind(entry.priority)
        .bind(entry.enqueued_at)
        .bind(entry.next_retry_at)
        .bind(entry.max_retries as i64)
        .bind(entry.retry_delay.map(|d| d.as_millis() as i64))
        .bind(&entry.destination)
        .bind(entry.correlation_id.map(|c| c.0.to_string()))
        .bind(entry.causation_id.map(|c| c.0.to_string()))
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn claim_batch(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>, MessagingError> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;

        let rows = sqlx::query(
            "SELECT * FROM mf_outbox_entries WHERE status = 'pending' AND next_retry_at <= ?
             ORDER BY priority DESC, enqueued_at ASC LIMIT ?",
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .map_err(sqlx_err)?;

        let mut claimed = Vec::with_capacity(rows.len());
        for row in &rows {
            let entry = Self::row_to_entry(row)?;
            sqlx::query("UPDATE mf_outbox_entries SET status = 'processing' WHERE id = ?")
                .bind(entry.id.to_string())
                .execute(&mut *tx)
                .await
                .map_err(sqlx_err)?;
            claimed.push(entry);
        }

        tx.commit().await.map_err(sqlx_err)?;
        Ok(claimed)
    }

    async fn try_claim(&self, id: Uuid) -> Result<Option<OutboxEntry>, MessagingError> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;
        let row = sqlx::query("SELECT * FROM mf_outbox_entries WHERE id = ? AND status = 'pending'")
            .bind(id.to_string())
            .fetch_optional(&mut *tx)
            .await
            .map_err(sqlx_err)?;
        let Some(row) = row else {
            tx.commit().await.map_err(sqlx_err)?;
            return Ok(None);
        };
        let entry = Self::row_to_entry(&row)?;
        sqlx::query("UPDATE mf_outbox_entries SET status = 'processing' WHERE id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(sqlx_err)?;
        tx.commit().await.map_err(sqlx_err)?;
        Ok(Some(entry))
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), MessagingError> {
        sqlx::query("UPDATE mf_outbox_entries SET status = 'completed' WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn mark_retry(&self, id: Uuid, retry_count: u32, next_retry_at: DateTime<Utc>) -> Result<(), MessagingError> {
        sqlx::query("UPDATE mf_outbox_entries SET status = 'pending', retry_count = ?, next_retry_at = ? WHERE id = ?")
            .bind(retry_count as i64)
            .bind(next_retry_at)
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), MessagingError> {
        sqlx::query("UPDATE mf_outbox_entries SET status = 'failed' WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }
}

