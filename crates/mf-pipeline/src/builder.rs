//! Fluent composition of the decorator chain.
//!
//! Decorators are strictly nested: each `.with_*` call wraps the processor
//! built so far. Conditional methods simply skip wrapping when their
//! dependency is absent, which is how "a decorator is omitted from the
//! pipeline rather than failing configuration" is satisfied here — there
//! is no separate registration step to fail.

use std::sync::Arc;

use mf_core::{Clock, MetricsCollector, Processor};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerDecorator};
use crate::correlation::CorrelationDecorator;
use crate::error_handling::{DeadLetterSink, ErrorHandlingDecorator, ErrorObserver};
use crate::logging::LoggingDecorator;
use crate::metrics::MetricsDecorator;
use crate::otel::TracingDecorator;
use crate::rate_limit::RateLimitDecorator;
use crate::retry::{RetryDecorator, RetryDelayPolicy};
use crate::validation::{ValidationDecorator, Validator};

pub struct PipelineBuilder<Req, Res> {
    processor: Arc<dyn Processor<Req, Res>>,
}

impl<Req, Res> PipelineBuilder<Req, Res>
where
    Req: Clone + std::fmt::Debug + Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    pub fn new(core: Arc<dyn Processor<Req, Res>>) -> Self {
        Self { processor: core }
    }

    pub fn with_validation(mut self, validator: Arc<dyn Validator<Req>>) -> Self {
        self.processor = Arc::new(ValidationDecorator::new(validator, self.processor));
        self
    }

    pub fn with_retry(mut self, clock: Arc<dyn Clock>, max_attempts: u32, delay_policy: RetryDelayPolicy) -> Self {
        self.processor = Arc::new(RetryDecorator::new(self.processor, clock, max_attempts, delay_policy));
        self
    }

    pub fn with_circuit_breaker(mut self, name: impl Into<String>, breaker: Arc<CircuitBreaker>) -> Self {
        self.processor = Arc::new(CircuitBreakerDecorator::new(name, breaker, self.processor));
        self
    }

    pub fn with_rate_limit(mut self, name: impl Into<String>, permits_per_second: u32, burst: u32) -> Self {
        self.processor = Arc::new(RateLimitDecorator::new(name, permits_per_second, burst, self.processor));
        self
    }

    pub fn with_error_handling(mut self, dlq: Option<Arc<dyn DeadLetterSink<Req>>>, observer: Option<Arc<dyn ErrorObserver>>) -> Self {
        let mut decorator = ErrorHandlingDecorator::new(self.processor);
        if let Some(dlq) = dlq {
            decorator = decorator.with_dlq(dlq);
        }
        if let Some(observer) = observer {
            decorator = decorator.with_observer(observer);
        }
        self.processor = Arc::new(decorator);
        self
    }

    pub fn with_metrics(mut self, clock: Arc<dyn Clock>, collector: Arc<MetricsCollector>) -> Self {
        self.processor = Arc::new(MetricsDecorator::new(clock, collector, self.processor));
        self
    }

    pub fn with_logging(mut self, name: impl Into<String>, include_payload: bool) -> Self {
        self.processor = Arc::new(LoggingDecorator::new(name, include_payload, self.processor));
        self
    }

    pub fn with_correlation(mut self) -> Self {
        self.processor = Arc::new(CorrelationDecorator::new(self.processor));
        self
    }

    pub fn with_tracing(mut self, operation: impl Into<String>) -> Self {
        self.processor = Arc::new(TracingDecorator::new(operation, self.processor));
        self
    }

    pub fn build(self) -> Arc<dyn Processor<Req, Res>> {
        self.processor
    }
}
