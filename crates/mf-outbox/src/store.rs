//! Outbox storage. `claim_batch`/`try_claim` must be safe against
//! duplicate pickups: once an entry is claimed (moved to `Processing`),
//! no other caller may claim it until it's released back to `Pending`
//! (on retry) or settled (`Completed`/`Failed`).

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use mf_core::MessagingError;

use crate::entry::{OutboxEntry, OutboxStatus};

#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn add(&self, entry: OutboxEntry) -> Result<(), MessagingError>;

    /// Claims up to `limit` `Pending` entries with `next_retry_at <= now`,
    /// ordered by `(priority DESC, enqueued_at ASC)`, flipping each to
    /// `Processing` in the same step.
    async fn claim_batch(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>, MessagingError>;

    /// Claims a single entry immediately regardless of `next_retry_at`,
    /// used by the high-priority bypass. Returns `None` if the entry is
    /// no longer `Pending` (e.g. the poller already claimed it).
    async fn try_claim(&self, id: Uuid) -> Result<Option<OutboxEntry>, MessagingError>;

    async fn mark_completed(&self, id: Uuid) -> Result<(), MessagingError>;

    /// Releases a claimed entry back to `Pending` with an incremented
    /// retry count and a new `next_retry_at`.
    async fn mark_retry(&self, id: Uuid, retry_count: u32, next_retry_at: DateTime<Utc>) -> Result<(), MessagingError>;

    async fn mark_failed(&self, id: Uuid) -> Result<(), MessagingError>;
}

#[derive(Default)]
pub struct InMemoryOutboxStore {
    entries: Mutex<HashMap<Uuid, OutboxEntry>>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_of(&self, id: Uuid) -> Option<OutboxStatus> {
        self.entries.lock().get(&id).map(|e| e.status)
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn add(&self, entry: OutboxEntry) -> Result<(), MessagingError> {
        self.entries.lock().insert(entry.id, entry);
        Ok(())
    }

    async fn claim_batch(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<OutboxEntry>, MessagingError> {
        let mut entries = self.entries.lock();
        let mut candidates: Vec<Uuid> = entries
            .values()
            .filter(|e| e.status == OutboxStatus::Pending && e.next_retry_at <= now)
            .map(|e| e.id)
            .collect();
        candidates.sort_by(|a, b| {
            let ea = &entries[a];
            let eb = &entries[b];
            eb.priority.cmp(&ea.priority).then_with(|| ea.enqueued_at.cmp(&eb.enqueued_at))
        });
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for id in candidates {
            if let Some(entry) = entries.get_mut(&id) {
                entry.status = OutboxStatus::Processing;
                claimed.push(entry.clone());
            }
        }
        Ok(claimed)
    }

    async fn try_claim(&self, id: Uuid) -> Result<Option<OutboxEntry>, MessagingError> {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.get_mut(&id) {
            if entry.status == OutboxStatus::Pending {
                entry.status = OutboxStatus::Processing;
                return Ok(Some(entry.clone()));
            }
        }
        Ok(None)
    }

    async fn mark_completed(&self, id: Uuid) -> Result<(), MessagingError> {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.status = OutboxStatus::Completed;
        }
        Ok(())
    }

    async fn mark_retry(&self, id: Uuid, retry_count: u32, next_retry_at: DateTime<Utc>) -> Result<(), MessagingError> {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.status = OutboxStatus::Pending;
            entry.retry_count = retry_count;
            entry.next_retry_at = next_retry_at;
        }
        Ok(())
    }

    async fn mark_failed(&self, id: Uuid) -> Result<(), MessagingError> {
        if let Some(entry) = self.entries.lock().get_mut(&id) {
            entry.status = OutboxStatus::Failed;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::PublishOptions;

    fn entry(priority: i32, at: DateTime<Utc>) -> OutboxEntry {
        OutboxEntry::new("Test", serde_json::json!({}), at, PublishOptions { priority, ..Default::default() })
    }

    #[tokio::test]
    async fn claim_batch_orders_by_priority_then_enqueued_at() {
        let store = InMemoryOutboxStore::new();
        let t0 = Utc::now();
        let low = entry(1, t0);
        let high_later = entry(5, t0 + chrono::Duration::seconds(1));
        let high_first = entry(5, t0);
        store.add(low).await.unwrap();
        store.add(high_later).await.unwrap();
        store.add(high_first.clone()).await.unwrap();

        let claimed = store.claim_batch(t0 + chrono::Duration::seconds(5), 10).await.unwrap();
        assert_eq!(claimed[0].id, high_first.id);
        assert_eq!(claimed.len(), 3);
        assert_eq!(store.status_of(high_first.id), Some(OutboxStatus::Processing));
    }

    #[tokio::test]
    async fn try_claim_fails_once_already_claimed() {
        let store = InMemoryOutboxStore::new();
        let t0 = Utc::now();
        let e = entry(9, t0);
        store.add(e.clone()).await.unwrap();

        let first = store.try_claim(e.id).await.unwrap();
        assert!(first.is_some());
        let second = store.try_claim(e.id).await.unwrap();
        assert!(second.is_none());
    }
}
