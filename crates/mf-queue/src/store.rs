//! Queue storage. Dequeue must atomically pick the highest-priority,
//! earliest-enqueued visible entry and mark it invisible in the same
//! step — two pickups racing for the same entry is exactly the bug this
//! contract exists to rule out.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use mf_core::MessagingError;

use crate::entry::{QueueEntry, RejectOutcome};

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), MessagingError>;

    /// Picks the visible entry with the highest `priority`, ties broken
    /// by earliest `enqueued_at`, sets `visible_at = now + visibility_timeout`
    /// and increments `dequeue_count` in the same step.
    async fn dequeue(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
        visibility_timeout: StdDuration,
    ) -> Result<Option<QueueEntry>, MessagingError>;

    async fn ack(&self, id: Uuid) -> Result<(), MessagingError>;

    /// Requeues (resets visibility) when `dequeue_count < max_requeue_attempts`,
    /// otherwise promotes the entry to the dead-letter store.
    async fn reject(&self, id: Uuid, now: DateTime<Utc>, max_requeue_attempts: u32) -> Result<RejectOutcome, MessagingError>;

    async fn depth(&self, queue_name: &str) -> Result<u64, MessagingError>;
}

#[derive(Default)]
pub struct InMemoryQueueStore {
    queues: Mutex<HashMap<String, Vec<QueueEntry>>>,
    dead_letters: Mutex<Vec<QueueEntry>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dead_letter_count(&self, queue_name: &str) -> usize {
        self.dead_letters
            .lock()
            .iter()
            .filter(|e| e.queue_name == queue_name)
            .count()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, entry: QueueEntry) -> Result<(), MessagingError> {
        self.queues.lock().entry(entry.queue_name.clone()).or_default().push(entry);
        Ok(())
    }

    async fn dequeue(
        &self,
        queue_name: &str,
        now: DateTime<Utc>,
        visibility_timeout: StdDuration,
    ) -> Result<Option<QueueEntry>, MessagingError> {
        let mut queues = self.queues.lock();
        let Some(entries) = queues.get_mut(queue_name) else {
            return Ok(None);
        };

        let pick = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.visible_at <= now)
            .max_by(|(_, a), (_, b)| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.enqueued_at.cmp(&a.enqueued_at))
            })
            .map(|(idx, _)| idx);

        let Some(idx) = pick else {
            return Ok(None);
        };

        let entry = &mut entries[idx];
        entry.visible_at = now + chrono::Duration::from_std(visibility_timeout).unwrap_or_default();
        entry.dequeue_count += 1;
        Ok(Some(entry.clone()))
    }

    async fn ack(&self, id: Uuid) -> Result<(), MessagingError> {
        let mut queues = self.queues.lock();
        for entries in queues.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                entries.remove(pos);
                return Ok(());
            }
        }
        Ok(())
    }

    async fn reject(&self, id: Uuid, now: DateTime<Utc>, max_requeue_attempts: u32) -> Result<RejectOutcome, MessagingError> {
        let mut queues = self.queues.lock();
        for entries in queues.values_mut() {
            if let Some(pos) = entries.iter().position(|e| e.id == id) {
                if entries[pos].dequeue_count < max_requeue_attempts {
                    entries[pos].visible_at = now;
                    return Ok(RejectOutcome::Requeued);
                }
                let dead = entries.remove(pos);
                self.dead_letters.lock().push(dead);
                return Ok(RejectOutcome::DeadLettered);
            }
        }
        Err(MessagingError::Configuration(format!("unknown queue entry {id}")))
    }

    async fn depth(&self, queue_name: &str) -> Result<u64, MessagingError> {
        Ok(self.queues.lock().get(queue_name).map(|e| e.len() as u64).unwrap_or(0))
    }
}
