//! Shared error taxonomy.
//!
//! Adapted from the teacher's per-crate `thiserror` enums
//! (`fc_common::FlowCatalystError`, `fc_queue::QueueError`): one
//! `thiserror`-derived enum per crate boundary, each error additionally
//! tagged with a [`Classification`] so the retry and circuit-breaker
//! pipeline decorators can decide what to do with it without
//! downcasting.

use thiserror::Error;

/// How the pipeline should treat a failure, per the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// No handler registered, duplicate registration, missing store.
    Configuration,
    /// Validator rejected the message; never retried.
    Validation,
    /// Timeout, IO, non-caller-initiated cancellation; eligible for retry.
    Transient,
    /// Invalid input or business rule violation; not retried, eligible for DLQ.
    Business,
    /// Saga version mismatch, inbox duplicate race; caller may retry the
    /// outer operation.
    Concurrency,
    /// Caller-initiated cancellation; never recorded as a failure.
    Cancelled,
    /// The processor has been disposed.
    Disposed,
}

impl Classification {
    pub fn is_retryable(self) -> bool {
        matches!(self, Classification::Transient)
    }
}

#[derive(Debug, Error)]
pub enum MessagingError {
    #[error("no handler registered for {0}")]
    NoHandler(String),

    #[error("duplicate handler registration for {0}")]
    DuplicateRegistration(String),

    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),

    #[error("processor is disposed")]
    Disposed,

    #[error("operation cancelled")]
    Cancelled,

    #[error("circuit breaker is open for {0}")]
    CircuitOpen(String),

    #[error("rate limit exceeded for {0}")]
    RateLimited(String),

    #[error("handler failed: {0}")]
    Handler(#[source] anyhow::Error),

    #[error("business rule violation: {0}")]
    Business(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("concurrency conflict: {0}")]
    Concurrency(String),
}

impl MessagingError {
    pub fn classify(&self) -> Classification {
        match self {
            MessagingError::NoHandler(_) | MessagingError::DuplicateRegistration(_) => {
                Classification::Configuration
            }
            MessagingError::Configuration(_) => Classification::Configuration,
            MessagingError::Validation(_) => Classification::Validation,
            MessagingError::Disposed => Classification::Disposed,
            MessagingError::Cancelled => Classification::Cancelled,
            MessagingError::CircuitOpen(_) | MessagingError::RateLimited(_) => {
                Classification::Transient
            }
            MessagingError::Handler(_) => Classification::Transient,
            MessagingError::Business(_) => Classification::Business,
            MessagingError::Concurrency(_) => Classification::Concurrency,
        }
    }
}

pub type Result<T> = std::result::Result<T, MessagingError>;
