use chrono::{DateTime, Utc};
use uuid::Uuid;

use mf_core::{CorrelationId, MessageId};

/// A persisted unit of work in a named queue. The payload is stored as
/// JSON keyed by `type_name` rather than a Rust type, so it survives a
/// process restart and is redelivered through
/// `mf_core::TypeDispatchRegistry` on dequeue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub id: Uuid,
    pub queue_name: String,
    pub type_name: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub visible_at: DateTime<Utc>,
    pub dequeue_count: u32,
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<MessageId>,
}

impl QueueEntry {
    pub fn new(
        queue_name: impl Into<String>,
        type_name: impl Into<String>,
        payload: serde_json::Value,
        priority: i32,
        now: DateTime<Utc>,
        correlation_id: Option<CorrelationId>,
        causation_id: Option<MessageId>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            queue_name: queue_name.into(),
            type_name: type_name.into(),
            payload,
            priority,
            enqueued_at: now,
            visible_at: now,
            dequeue_count: 0,
            correlation_id,
            causation_id,
        }
    }
}

/// What happened to an entry after a handler reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectOutcome {
    Requeued,
    DeadLettered,
}
