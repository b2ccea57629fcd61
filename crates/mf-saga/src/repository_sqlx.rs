//! SQLite-backed [`SagaRepository`]. The CAS on `version` is a plain
//! `UPDATE ... WHERE version = ?`: zero rows affected means the version
//! didn't match, which is indistinguishable from "row missing" at the
//! SQL level and is treated the same way — both are the caller's cue
//! to reload and retry.

use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use mf_core::{CorrelationId, MessagingError};

use crate::instance::SagaInstance;
use crate::repository::SagaRepository;

pub struct SqlxSagaRepository {
    pool: SqlitePool,
}

impl SqlxSagaRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mf_saga_instances (
                correlation_id TEXT PRIMARY KEY,
                current_state TEXT NOT NULL,
                data TEXT NOT NULL,
                version INTEGER NOT NULL,
                is_completed INTEGER NOT NULL DEFAULT 0,
                is_failed INTEGER NOT NULL DEFAULT 0,
                failure_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS mf_saga_instances_state_idx ON mf_saga_instances (current_state)")
            .execute(pool)
            .await?;
        Ok(())
    }

    fn row_to_instance(row: &sqlx::sqlite::SqliteRow) -> Result<SagaInstance, MessagingError> {
        let correlation_id: String = row.try_get("correlation_id").map_err(sqlx_err)?;
        let data: String = row.try_get("data").map_err(sqlx_err)?;
        let version: i64 = row.try_get("version").map_err(sqlx_err)?;
        let is_completed: i64 = row.try_get("is_completed").map_err(sqlx_err)?;
        let is_failed: i64 = row.try_get("is_failed").map_err(sqlx_err)?;

        Ok(SagaInstance {
            correlation_id: CorrelationId(Uuid::parse_str(&correlation_id).map_err(|e| MessagingError::Configuration(e.to_string()))?),
            current_state: row.try_get("current_state").map_err(sqlx_err)?,
            data: serde_json::from_str(&data).map_err(|e| MessagingError::Configuration(e.to_string()))?,
            version: version as u64,
            is_completed: is_completed != 0,
            is_failed: is_failed != 0,
            failure_reason: row.try_get("failure_reason").map_err(sqlx_err)?,
            created_at: row.try_get("created_at").map_err(sqlx_err)?,
            updated_at: row.try_get("updated_at").map_err(sqlx_err)?,
        })
    }
}

fn sqlx_err(e: sqlx::Error) -> MessagingError {
    MessagingError::Handler(anyhow::anyhow!(e))
}

#[async_trait]
impl SagaRepository for SqlxSagaRepository {
    async fn find(&self, correlation_id: CorrelationId) -> Result<Option<SagaInstance>, MessagingError> {
        let row = sqlx::query("SELECT * FROM mf_saga_instances WHERE correlation_id = ?")
            .bind(correlation_id.0.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(sqlx_err)?;
        row.as_ref().map(Self::row_to_instance).transpose()
    }

    async fn find_by_state(&self, state: &str) -> Result<Vec<SagaInstance>, MessagingError> {
        let rows = sqlx::query("SELECT * FROM mf_saga_instances WHERE current_state = ?")
            .bind(state)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn find_stale(&self, older_than: StdDuration, now: DateTime<Utc>) -> Result<Vec<SagaInstance>, MessagingError> {
        let cutoff = now - chrono::Duration::from_std(older_than).unwrap_or_default();
        let rows = sqlx::query("SELECT * FROM mf_saga_instances WHERE is_completed = 0 AND updated_at < ?")
            .bind(cutoff)
            .fetch_all(&self.pool)
            .await
            .map_err(sqlx_err)?;
        rows.iter().map(Self::row_to_instance).collect()
    }

    async fn save(&self, instance: SagaInstance) -> Result<(), MessagingError> {
        let data = serde_json::to_string(&instance.data).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        sqlx::query(
            "INSERT INTO mf_saga_instances
             (correlation_id, current_state, data, version, is_completed, is_failed, failure_reason, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?, ?, ?, ?)",
        )
        .bind(instance.correlation_id.0.to_string())
        .bind(&instance.current_state)
        .bind(data)
        .bind(instance.is_completed as i64)
        .bind(instance.is_failed as i64)
        .bind(&instance.failure_reason)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                MessagingError::Concurrency(format!("saga instance for correlation {} already exists", instance.correlation_id))
            }
            other => sqlx_err(other),
        })?;
        Ok(())
    }

    async fn update(&self, instance: SagaInstance) -> Result<(), MessagingError> {
        let data = serde_json::to_string(&instance.data).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        let result = sqlx::query(
            "UPDATE mf_saga_instances
             SET current_state = ?, data = ?, version = version + 1, is_completed = ?, is_failed = ?, failure_reason = ?, updated_at = ?
             WHERE correlation_id = ? AND version = ?",
        )
        .bind(&instance.current_state)
        .bind(data)
        .bind(instance.is_completed as i64)
        .bind(instance.is_failed as i64)
        .bind(&instance.failure_reason)
        .bind(instance.updated_at)
        .bind(instance.correlation_id.0.to_string())
        .bind(instance.version as i64)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;

        if result.rows_affected() == 0 {
            return Err(MessagingError::Concurrency(format!(
                "version mismatch or missing saga instance for correlation {}",
                instance.correlation_id
            )));
        }
        Ok(())
    }

    async fn delete(&self, correlation_id: CorrelationId) -> Result<(), MessagingError> {
        sqlx::query("DELETE FROM mf_saga_instances WHERE correlation_id = ?")
            .bind(correlation_id.0.to_string())
            .execute(&self.pool)
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), MessagingError> {
        sqlx::query("DELETE FROM mf_saga_instances").execute(&self.pool).await.map_err(sqlx_err)?;
        Ok(())
    }
}
