//! Inbox storage. Admission is the dedup gate: a `MessageId` already
//! present within the deduplication window is rejected before any
//! handler runs, per the "store's uniqueness guarantee" contract —
//! racy concurrent admissions for the same id must resolve to exactly
//! one winner.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use mf_core::{MessageId, MessagingError};

use crate::entry::{InboxEntry, InboxStatus};

#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Inserts `entry` unless a non-expired entry with the same id is
    /// already present. Returns `true` when admitted, `false` when a
    /// duplicate was detected.
    async fn try_admit(&self, entry: InboxEntry, window: StdDuration) -> Result<bool, MessagingError>;

    async fn mark_processed(&self, id: MessageId, at: DateTime<Utc>) -> Result<(), MessagingError>;

    async fn mark_failed(&self, id: MessageId, error: String) -> Result<(), MessagingError>;

    /// Deletes `Processed` entries whose `processed_at` predates `cutoff`.
    /// `Failed` entries are never removed by this call.
    async fn cleanup_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MessagingError>;
}

#[derive(Default)]
pub struct InMemoryInboxStore {
    entries: Mutex<HashMap<MessageId, InboxEntry>>,
}

impl InMemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status_of(&self, id: MessageId) -> Option<InboxStatus> {
        self.entries.lock().get(&id).map(|e| e.status)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn try_admit(&self, entry: InboxEntry, window: StdDuration) -> Result<bool, MessagingError> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(&entry.id) {
            let age = entry.received_at.signed_duration_since(existing.received_at);
            if age <= chrono::Duration::from_std(window).unwrap_or_default() {
                return Ok(false);
            }
        }
        entries.insert(entry.id, entry);
        Ok(true)
    }

    async fn mark_processed(&self, id: MessageId, at: DateTime<Utc>) -> Result<(), MessagingError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| MessagingError::Configuration(format!("unknown inbox entry {id}")))?;
        entry.status = InboxStatus::Processed;
        entry.processed_at = Some(at);
        Ok(())
    }

    async fn mark_failed(&self, id: MessageId, error: String) -> Result<(), MessagingError> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(&id)
            .ok_or_else(|| MessagingError::Configuration(format!("unknown inbox entry {id}")))?;
        entry.status = InboxStatus::Failed;
        entry.error = Some(error);
        Ok(())
    }

    async fn cleanup_processed_before(&self, cutoff: DateTime<Utc>) -> Result<u64, MessagingError> {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !(e.status == InboxStatus::Processed && e.processed_at.map(|p| p < cutoff).unwrap_or(false)));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: MessageId, at: DateTime<Utc>) -> InboxEntry {
        InboxEntry::new(id, "test", "Test", serde_json::json!({}), at, None, None)
    }

    #[tokio::test]
    async fn duplicate_within_window_is_rejected() {
        let store = InMemoryInboxStore::new();
        let id = MessageId::new();
        let t0 = Utc::now();

        assert!(store.try_admit(entry(id, t0), StdDuration::from_secs(60)).await.unwrap());
        assert!(!store
            .try_admit(entry(id, t0 + chrono::Duration::seconds(5)), StdDuration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn same_id_outside_window_is_readmitted() {
        let store = InMemoryInboxStore::new();
        let id = MessageId::new();
        let t0 = Utc::now();

        assert!(store.try_admit(entry(id, t0), StdDuration::from_secs(60)).await.unwrap());
        assert!(store
            .try_admit(entry(id, t0 + chrono::Duration::seconds(120)), StdDuration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn cleanup_removes_only_old_processed_entries() {
        let store = InMemoryInboxStore::new();
        let t0 = Utc::now();
        let processed_old = MessageId::new();
        let processed_recent = MessageId::new();
        let failed_old = MessageId::new();

        store.try_admit(entry(processed_old, t0), StdDuration::from_secs(60)).await.unwrap();
        store.try_admit(entry(processed_recent, t0), StdDuration::from_secs(60)).await.unwrap();
        store.try_admit(entry(failed_old, t0), StdDuration::from_secs(60)).await.unwrap();

        store.mark_processed(processed_old, t0).await.unwrap();
        store.mark_processed(processed_recent, t0 + chrono::Duration::days(10)).await.unwrap();
        store.mark_failed(failed_old, "boom".into()).await.unwrap();

        let removed = store.cleanup_processed_before(t0 + chrono::Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.status_of(processed_old), None);
        assert_eq!(store.status_of(processed_recent), Some(InboxStatus::Processed));
        assert_eq!(store.status_of(failed_old), Some(InboxStatus::Failed));
    }
}
