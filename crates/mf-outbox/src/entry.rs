use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use mf_core::{CorrelationId, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// A durable record of "publish this eventually", appended in the same
/// business transaction as the change that produced it and dispatched
/// out-of-band by [`crate::dispatcher::OutboxDispatcher`].
#[derive(Debug, Clone)]
pub struct OutboxEntry {
    pub id: Uuid,
    pub type_name: String,
    pub payload: serde_json::Value,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    pub next_retry_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub retry_delay: Option<StdDuration>,
    pub destination: Option<String>,
    pub status: OutboxStatus,
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<MessageId>,
}

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    pub priority: i32,
    pub max_retries: u32,
    pub retry_delay: Option<StdDuration>,
    pub destination: Option<String>,
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<MessageId>,
}

impl OutboxEntry {
    pub fn new(type_name: impl Into<String>, payload: serde_json::Value, now: DateTime<Utc>, options: PublishOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            type_name: type_name.into(),
            payload,
            priority: options.priority,
            enqueued_at: now,
            next_retry_at: now,
            retry_count: 0,
            max_retries: if options.max_retries == 0 { 3 } else { options.max_retries },
            retry_delay: options.retry_delay,
            destination: options.destination,
            status: OutboxStatus::Pending,
            correlation_id: options.correlation_id,
            causation_id: options.causation_id,
        }
    }

    /// `delay = retry_delay ?? 2^retry_count seconds`, capped at `cap`.
    pub fn backoff_delay(&self, cap: StdDuration) -> StdDuration {
        let delay = self.retry_delay.unwrap_or_else(|| StdDuration::from_secs(2u64.saturating_pow(self.retry_count)));
        delay.min(cap)
    }
}
