use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};

use mf_core::{CorrelationId, MessageId};

/// Window within which the same `MessageId` is treated as a duplicate
/// when the caller doesn't supply one.
pub const DEFAULT_DEDUPLICATION_WINDOW: StdDuration = StdDuration::from_secs(24 * 60 * 60);

/// How long a `Processed` entry survives before housekeeping deletes it.
pub const DEFAULT_RETENTION: StdDuration = StdDuration::from_secs(7 * 24 * 60 * 60);

/// How often the housekeeping sweep runs.
pub const DEFAULT_CLEANUP_INTERVAL: StdDuration = StdDuration::from_secs(60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboxStatus {
    Pending,
    Processed,
    Failed,
}

/// Options accompanying an inbound message, per `ProcessIncomingAsync`.
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub source: String,
    pub require_idempotency: bool,
    pub deduplication_window: StdDuration,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            source: String::new(),
            require_idempotency: true,
            deduplication_window: DEFAULT_DEDUPLICATION_WINDOW,
        }
    }
}

/// A record of one inbound message, kept for dedup and audit after it
/// has already run through the handler registry.
#[derive(Debug, Clone)]
pub struct InboxEntry {
    pub id: MessageId,
    pub source: String,
    pub type_name: String,
    pub payload: serde_json::Value,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub status: InboxStatus,
    pub error: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<MessageId>,
}

impl InboxEntry {
    pub fn new(
        id: MessageId,
        source: impl Into<String>,
        type_name: impl Into<String>,
        payload: serde_json::Value,
        received_at: DateTime<Utc>,
        correlation_id: Option<CorrelationId>,
        causation_id: Option<MessageId>,
    ) -> Self {
        Self {
            id,
            source: source.into(),
            type_name: type_name.into(),
            payload,
            received_at,
            processed_at: None,
            status: InboxStatus::Pending,
            error: None,
            correlation_id,
            causation_id,
        }
    }
}
