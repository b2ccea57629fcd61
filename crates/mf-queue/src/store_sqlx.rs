//! SQLite-backed [`QueueStore`], for deployments that need the queue to
//! survive a process restart. Dequeue runs the pick-and-mark-invisible
//! step inside one transaction so two workers racing for the same
//! `queue_name` never both win the same row.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use mf_core::{CorrelationId, MessageId, MessagingError};

use crate::entry::{QueueEntry, RejectOutcome};
use crate::store::QueueStore;

pub struct SqlxQueueStore {
    pool: SqlitePool,
}

impl SqlxQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mf_queue_entries (
                id TEXT PRIMARY KEY,
                queue_name TEXT NOT NULL,
                type_name TEXT NOT NULL,
                payload TEXT NOT NULL,
                priority INTEGER NOT NULL,
                enqueued_at TEXT NOT NULL,
                visible_at TEXT NOT NULL,
                dequeue_count INTEGER NOT NULL DEFAULT 0,
                correlation_id TEXT,
                causation_id TEXT,
                status TEXT NOT NULL DEFAULT 'pending'
            )
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS mf_queue_entries_dequeue_idx ON mf_queue_entries (queue_name, status, visible_at, priority, enqueued_at)")
            .execute(pool)
            .await?;
        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<QueueEntry, MessagingError> {
        let id: String = row.try_get("id").map_err(sqlx_err)?;
        let correlation_id: Option<String> = row.try_get("correlation_id").map_err(sqlx_err)?;
        let causation_id: Option<String> = row.try_get("causation_id").map_err(sqlx_err)?;
        let payload: String = row.try_get("payload").map_err(sqlx_err)?;
        Ok(QueueEntry {
            id: Uuid::parse_str(&id).map_err(|e| MessagingError::Configuration(e.to_string()))?,
            queue_name: row.try_get("queue_name").map_err(sqlx_err)?,
            type_name: row.try_get("type_name").map_err(sqlx_err)?,
            payload: serde_json::from_str(&payload).map_err(|e| MessagingError::Configuration(e.to_string()))?,
            priority: row.try_get("priority").map_err(sqlx_err)?,
            enqueued_at: row.try_get("enqueued_at").map_err(sqlx_err)?,
            visible_at: row.try_get("visible_at").map_err(sqlx_err)?,
            dequeue_count: {
                let n: i64 = row.try_get("dequeue_count").map_err(sqlx_err)?;
                n as u32
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
impl QueueStore for SqlxQueueStore {
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), MessagingError> {
        let payload = serde_json::to_string(&entry.payload).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        sqlx::query(
            "INSERT INTO mf_queue_entries (id, queue_name, type_name, payload, priority, enqueued_at, visible_at, dequeue_count, correlation_id, causation_id, status)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?, 'pending')",
        )
        .bind(entry.id.to_string())
        .bind(&entry.queue_name)
        .bind(&entry.type_name)
        .bind(payload)
        .bind(entry.priority)
        .bind(entry.enqueued_at)
        .bind(entry.visible_at)
        .bind(entry.correlation_id.map(|c| c.0.to_string()))
        .bind(entry.causation_id.map(|c| c.0.to_string()))
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn dequeue(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
        visibility_timeout: StdDuration,
    ) -> Result<Option<QueueEntry>, MessagingError> {
        let mut tx = self.pool.begin().await.map_err(sqlx_err)?;

        let row = sqlx::query(
            "SELECT * FROM mf_queue_entries WHERE queue_name = ? AND status = 'pending' AND visible_at <= ?
             ORDER BY priority DESC, enqueued_at ASC LIMIT 1",
        )
        .bind(queue_name)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await
        .map_err(sqlx_err)?;

        let Some(row) = row else {
            tx.commit().await.map_err(sqlx_err)?;
            return Ok(None);
        };

        let mut entry = Self::row_to_entry(&row)?;
        entry.visible_at = now + chrono::Duration::from_std(visibility_timeout).unwrap_or_default();
        entry.dequeue_count += 1;

        sqlx::query("UPDATE mf_queue_entries SET visible_at = ?, dequeue_count = ? WHERE id = ?")
            .bind(entry.visible_at)
            .bind(entry.dequeue_count as i64)
            .bind(entry.id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(sqlx_err)?;

        tx.commit().await.map_err(sqlx_err)?;
        Ok(Some(entry))
    }

    async fn ack(&self, id: Uuid) -> Result<(), MessagingError> {
        sqlx::query("DELETE FROM mf_queue_entries WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn reject(&self, id: Uuid, now: DateTime<Utc>, max_requeue_attempts: u32) -> Result<RejectOutcome, MessagingError> {
        let row = sqlx::query("SELECT dequeue_count FROM mf_queue_entries WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?
            .ok_or_else(|| MessagingError::Configuration(format!("unknown queue entry {id}")))?;
        let dequeue_count: i64 = row.try_get("dequeue_count").map_err(sqlx_err)?;

        if (dequeue_count as u32) < max_requeue_attempts {
            sqlx::query("UPDATE mf_queue_entries SET visible_at = ? WHERE id = ?")
                .bind(now)
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(sqlx_err)?;
            Ok(RejectOutcome::Requeued)
        } else {
            sqlx::query("UPDATE mf_queue_entries SET status = 'dead' WHERE id = ?")
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .map_err(sqlx_err)?;
            Ok(RejectOutcome::DeadLettered)
        }
    }

    async fn depth(&self, queue_name: &str) -> Result<u64, MessagingError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM mf_queue_entries WHERE queue_name = ? AND status = 'pending'")
            .bind(queue_name)
            .fetch_one(&self.pool)
            .await
            .map_err(sqlx_err)?;
        let n: i64 = row.try_get("n").map_err(sqlx_err)?;
        Ok(n as u64)
    }
}
