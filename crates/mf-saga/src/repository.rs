//! Saga storage. `update` is the optimistic-concurrency gate: callers
//! pass back the `version` they loaded, and a mismatch against the
//! stored value means someone else persisted in between — the caller
//! must reload and retry, never silently overwrite.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use mf_core::{CorrelationId, MessagingError};

use crate::instance::SagaInstance;

#[async_trait]
pub trait SagaRepository: Send + Sync {
    async fn find(&self, correlation_id: CorrelationId) -> Result<Option<SagaInstance>, MessagingError>;

    async fn find_by_state(&self, state: &str) -> Result<Vec<SagaInstance>, MessagingError>;

    async fn find_stale(&self, older_than: StdDuration, now: DateTime<Utc>) -> Result<Vec<SagaInstance>, MessagingError>;

    /// Inserts a brand new instance. A duplicate `correlation_id` is a
    /// conflict, not an overwrite.
    async fn save(&self, instance: SagaInstance) -> Result<(), MessagingError>;

    /// Compare-and-swap on `version`, then increments it. A missing
    /// instance or a version mismatch is a [`mf_core::Classification::Concurrency`] failure.
    async fn update(&self, instance: SagaInstance) -> Result<(), MessagingError>;

    async fn delete(&self, correlation_id: CorrelationId) -> Result<(), MessagingError>;

    async fn clear(&self) -> Result<(), MessagingError>;
}

#[derive(Default)]
pub struct InMemorySagaRepository {
    instances: Mutex<HashMap<CorrelationId, SagaInstance>>,
}

impl InMemorySagaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn find(&self, correlation_id: CorrelationId) -> Result<Option<SagaInstance>, MessagingError> {
        Ok(self.instances.lock().get(&correlation_id).cloned())
    }

    async fn find_by_state(&self, state: &str) -> Result<Vec<SagaInstance>, MessagingError> {
        Ok(self
            .instances
            .lock()
            .values()
            .filter(|i| i.current_state == state)
            .cloned()
            .collect())
    }

    async fn find_stale(&self, older_than: StdDuration, now: DateTime<Utc>) -> Result<Vec<SagaInstance>, MessagingError> {
        let cutoff = now - chrono::Duration::from_std(older_than).unwrap_or_default();
        Ok(self
            .instances
            .lock()
            .values()
            .filter(|i| !i.is_completed && i.updated_at < cutoff)
            .cloned()
            .collect())
    }

    async fn save(&self, instance: SagaInstance) -> Result<(), MessagingError> {
        let mut instances = self.instances.lock();
        if instances.contains_key(&instance.correlation_id) {
            return Err(MessagingError::Concurrency(format!(
                "saga instance for correlation {} already exists",
                instance.correlation_id
            )));
        }
        instances.insert(instance.correlation_id, instance);
        Ok(())
    }

    async fn update(&self, mut instance: SagaInstance) -> Result<(), MessagingError> {
        let mut instances = self.instances.lock();
        let current = instances
            .get(&instance.correlation_id)
            .ok_or_else(|| MessagingError::Concurrency(format!("no saga instance for correlation {}", instance.correlation_id)))?;

        if current.version != instance.version {
            return Err(MessagingError::Concurrency(format!(
                "version mismatch for saga {}: expected {}, found {}",
                instance.correlation_id, instance.version, current.version
            )));
        }

        instance.version += 1;
        instances.insert(instance.correlation_id, instance);
        Ok(())
    }

    async fn delete(&self, correlation_id: CorrelationId) -> Result<(), MessagingError> {
        self.instances.lock().remove(&correlation_id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), MessagingError> {
        self.instances.lock().clear();
        Ok(())
    }
}
