use chrono::{DateTime, Utc};

use mf_core::CorrelationId;

/// Persisted state of one running saga. `data` is kept as JSON rather
/// than the saga's concrete data type so one repository implementation
/// serves every saga definition.
#[derive(Debug, Clone)]
pub struct SagaInstance {
    pub correlation_id: CorrelationId,
    pub current_state: String,
    pub data: serde_json::Value,
    pub version: u64,
    pub is_completed: bool,
    pub is_failed: bool,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaInstance {
    pub fn new(correlation_id: CorrelationId, initial_state: impl Into<String>, data: serde_json::Value, now: DateTime<Utc>) -> Self {
        Self {
            correlation_id,
            current_state: initial_state.into(),
            data,
            version: 0,
            is_completed: false,
            is_failed: false,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}
