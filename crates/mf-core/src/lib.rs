//! Core primitives shared by every processing surface: message identity
//! and envelopes, the handler registry, the `Processor` decorator seam,
//! ambient correlation, injectable time, cooperative cancellation, the
//! shared error taxonomy, metrics, logging init, and message versioning.

pub mod cancellation;
pub mod correlation;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod message;
pub mod metrics;
pub mod processing;
pub mod registry;
pub mod time;
pub mod versioning;

pub use cancellation::CancellationToken;
pub use correlation::{with_root_scope, CorrelationContext, CorrelationFrame};
pub use dispatch::TypeDispatchRegistry;
pub use error::{Classification, MessagingError, Result};
pub use message::{Command, CorrelationId, Envelope, Event, Message, MessageId, Query};
pub use metrics::{MetricsCollector, MetricsConfig, MetricsSnapshot};
pub use processing::{CommandHandler, EventHandler, ProcessingContext, Processor, QueryHandler};
pub use registry::HandlerRegistry;
pub use time::{Clock, FakeClock, SystemClock};
pub use versioning::{ConverterRegistry, MessageVersion, VERSION_METADATA_KEY};
