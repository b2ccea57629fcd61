//! Message identity, envelope, and the Command/Query/Event marker traits.
//!
//! A [`Message<T>`] pairs an immutable [`Envelope`] (identity, timestamp,
//! correlation/causation, metadata) with a payload `T`. Handlers are
//! registered against the payload's concrete type; the envelope travels
//! alongside it through the processor pipeline untouched except where a
//! decorator explicitly derives a new correlation scope.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::correlation::CorrelationContext;
use crate::time::Clock;
use crate::versioning::VERSION_METADATA_KEY;

/// Unique identity of a single constructed message instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Workflow-scoped identifier linking every message in one business transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity, timing and causal metadata carried by every message.
///
/// Invariant: if `causation_id` is set, `correlation_id` must also be set.
/// Construction helpers in this module uphold that invariant; there is no
/// public constructor that can violate it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<MessageId>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Envelope {
    /// A fresh envelope with no correlation/causation and empty metadata.
    pub fn new(clock: &dyn Clock) -> Self {
        Self {
            id: MessageId::new(),
            timestamp: clock.now(),
            correlation_id: None,
            causation_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Version recorded in metadata, defaulting to 1 when absent.
    pub fn version(&self) -> u16 {
        self.metadata
            .get(VERSION_METADATA_KEY)
            .and_then(|v| v.as_u64())
            .map(|v| v as u16)
            .unwrap_or(1)
    }

    pub fn with_version(mut self, version: u16) -> Self {
        self.metadata
            .insert(VERSION_METADATA_KEY.to_string(), serde_json::json!(version));
        self
    }

    /// Returns a copy of this envelope with correlation/causation derived
    /// per the rules in the messaging spec:
    ///
    /// - If both `correlation_id` and `causation_id` arguments are `None`,
    ///   the ambient [`CorrelationContext`] (if any) supplies
    ///   `correlation_id`, and the ambient frame's message id supplies
    ///   `causation_id`.
    /// - If neither the ambient context nor the argument supplies a
    ///   `correlation_id`, a fresh one is generated.
    /// - A brand new [`MessageId`] and timestamp are always assigned: this
    ///   produces a *new* message in the causal chain, not a mutation of
    ///   `self`.
    pub fn derive(
        &self,
        clock: &dyn Clock,
        correlation_id: Option<CorrelationId>,
        causation_id: Option<MessageId>,
    ) -> Self {
        let (correlation_id, causation_id) = if correlation_id.is_none() && causation_id.is_none() {
            let ambient = CorrelationContext::current();
            let correlation = ambient
                .as_ref()
                .and_then(|f| f.correlation_id)
                .unwrap_or_else(CorrelationId::new);
            let causation = ambient.as_ref().map(|f| f.message_id);
            (Some(correlation), causation)
        } else {
            let correlation = correlation_id.unwrap_or_else(CorrelationId::new);
            (Some(correlation), causation_id)
        };

        Self {
            id: MessageId::new(),
            timestamp: clock.now(),
            correlation_id,
            causation_id,
            metadata: self.metadata.clone(),
        }
    }
}

/// An envelope paired with a typed payload.
#[derive(Debug, Clone)]
pub struct Message<T> {
    pub envelope: Envelope,
    pub payload: T,
}

impl<T> Message<T> {
    pub fn new(payload: T, clock: &dyn Clock) -> Self {
        Self {
            envelope: Envelope::new(clock),
            payload,
        }
    }

    pub fn id(&self) -> MessageId {
        self.envelope.id
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.envelope.correlation_id
    }

    /// `WithCorrelation` from the spec: returns a new message derived from
    /// this one's payload (cloned) with correlation/causation computed per
    /// [`Envelope::derive`].
    pub fn with_correlation(
        &self,
        clock: &dyn Clock,
        correlation_id: Option<CorrelationId>,
        causation_id: Option<MessageId>,
    ) -> Self
    where
        T: Clone,
    {
        Self {
            envelope: self.envelope.derive(clock, correlation_id, causation_id),
            payload: self.payload.clone(),
        }
    }
}

/// A command with no meaningful result. `Response` is `()`.
pub trait Command: fmt::Debug + Send + Sync + 'static {
    type Response: Send + 'static;
}

/// A query that always returns a typed response.
pub trait Query: fmt::Debug + Send + Sync + 'static {
    type Response: Send + 'static;
}

/// An event broadcast to zero or more subscribers.
pub trait Event: fmt::Debug + Clone + Send + Sync + 'static {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemClock;

    #[test]
    fn derive_without_ambient_generates_fresh_correlation() {
        let clock = SystemClock;
        let env = Envelope::new(&clock);
        let derived = env.derive(&clock, None, None);
        assert!(derived.correlation_id.is_some());
        assert_ne!(derived.id, env.id);
    }

    #[test]
    fn with_correlation_round_trip_preserves_fields() {
        let clock = SystemClock;
        let msg = Message::new("payload".to_string(), &clock);
        let cid = CorrelationId::new();
        let round_tripped = msg.with_correlation(&clock, Some(cid), None);
        let again = round_tripped.with_correlation(&clock, Some(cid), None);
        assert_eq!(round_tripped.correlation_id(), again.correlation_id());
        assert_eq!(round_tripped.payload, again.payload);
    }

    #[test]
    fn version_defaults_to_one() {
        let clock = SystemClock;
        let env = Envelope::new(&clock);
        assert_eq!(env.version(), 1);
        let versioned = env.with_version(3);
        assert_eq!(versioned.version(), 3);
    }
}
