//! The processor decorator pipeline: validation, retry, circuit breaker,
//! rate limiting, error handling/DLQ, metrics, logging, correlation, and
//! OpenTelemetry-style tracing — each wraps an [`mf_core::Processor`] and
//! is itself one, so they strictly nest.

pub mod builder;
pub mod circuit_breaker;
pub mod correlation;
pub mod error_handling;
pub mod logging;
pub mod metrics;
pub mod otel;
pub mod rate_limit;
pub mod retry;
pub mod validation;

pub use builder::PipelineBuilder;
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerDecorator, CircuitBreakerRegistry, CircuitBreakerStats, CircuitState,
};
pub use correlation::CorrelationDecorator;
pub use error_handling::{DeadLetterSink, ErrorHandlingDecorator, ErrorObserver};
pub use logging::LoggingDecorator;
pub use metrics::MetricsDecorator;
pub use otel::TracingDecorator;
pub use rate_limit::RateLimitDecorator;
pub use retry::{RetryDecorator, RetryDelayPolicy};
pub use validation::{ValidationDecorator, Validator};
