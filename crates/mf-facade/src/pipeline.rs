//! Bridges a registered `CommandHandler`/`QueryHandler`/`EventHandler`
//! through [`mf_pipeline`]'s decorator chain. The handler traits and
//! `Processor::process` share the same `(request, &ProcessingContext) ->
//! Result<Res, _>` shape, so wrapping one in the other just forwards; the
//! interesting part is composing validation/circuit-breaker/retry/rate-limit
//! /error-handling/metrics/logging/correlation/tracing around that forward
//! per [`mf_config::PipelineConfig`] before the handler is ever registered,
//! rather than the façade silently wrapping every handler the same way.
//!
//! Every decorated handler is registered once into the shared
//! [`mf_core::HandlerRegistry`] that `mf_core::TypeDispatchRegistry` resolves
//! from on every dispatch, so decorating at registration time is enough to
//! cover direct dispatch (command/query/event) and durable redelivery
//! (queue/outbox/inbox) alike without touching their dispatch code.

use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use mf_config::PipelineConfig;
use mf_core::{
    Clock, Command, CommandHandler, Event, EventHandler, MessagingError, MetricsCollector, Message, ProcessingContext,
    Processor, Query, QueryHandler,
};
use mf_pipeline::{CircuitBreakerRegistry, ErrorObserver, PipelineBuilder, RetryDelayPolicy, Validator};

/// Logs a terminal failure before the error is returned to the caller.
/// The façade's default [`ErrorObserver`]; an application can register its
/// own (metrics export, paging) by building its own pipeline instead of
/// going through `decorate_*`.
struct TracingErrorObserver;

#[async_trait]
impl ErrorObserver for TracingErrorObserver {
    async fn on_error(&self, ctx: &ProcessingContext, error: &MessagingError) {
        warn!(message_id = %ctx.envelope.id, attempt = ctx.attempt, error = %error, "handler failed");
    }
}

/// Wraps `base` with every decorator `config` enables, in a fixed nesting
/// order: circuit breaker and retry innermost (so each retried attempt
/// re-enters the breaker), then rate limiting, then validation (checked
/// once per call rather than once per retry attempt), then error handling,
/// then metrics, then logging, then correlation, then tracing outermost so
/// the span covers everything a single call does.
fn wire<Req, Res>(
    base: Arc<dyn Processor<Req, Res>>,
    name: &str,
    config: &PipelineConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    circuit_breakers: &CircuitBreakerRegistry,
    validator: Option<Arc<dyn Validator<Req>>>,
) -> Arc<dyn Processor<Req, Res>>
where
    Req: Clone + Debug + Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    let mut builder = PipelineBuilder::new(base);

    if config.circuit_breaker.enabled {
        let breaker = circuit_breakers.get_or_create(name);
        builder = builder.with_circuit_breaker(name, breaker);
    }

    if config.retry.enabled {
        builder = builder.with_retry(
            clock.clone(),
            config.retry.max_attempts,
            RetryDelayPolicy::ExponentialWithJitter {
                base: std::time::Duration::from_millis(config.retry.base_delay_ms),
                max: std::time::Duration::from_millis(config.retry.max_delay_ms),
            },
        );
    }

    if config.rate_limiter.enabled {
        builder = builder.with_rate_limit(name, config.rate_limiter.permits_per_second, config.rate_limiter.burst);
    }

    if let Some(validator) = validator {
        builder = builder.with_validation(validator);
    }

    if config.error_handling.enabled {
        builder = builder.with_error_handling(None, Some(Arc::new(TracingErrorObserver)));
    }

    builder = builder.with_metrics(clock, metrics).with_logging(name, false);

    if config.correlation.enabled {
        builder = builder.with_correlation();
    }

    if config.otel.enabled {
        builder = builder.with_tracing(name);
    }

    builder.build()
}

struct HandlerAsProcessor<C: Command> {
    handler: Arc<dyn CommandHandler<C>>,
}

#[async_trait]
impl<C> Processor<Message<C>, C::Response> for HandlerAsProcessor<C>
where
    C: Command,
    Message<C>: Clone + Debug,
    C::Response: Send + Sync + 'static,
{
    async fn process(&self, request: Message<C>, ctx: &ProcessingContext) -> Result<C::Response, MessagingError> {
        self.handler.handle(request, ctx).await
    }
}

struct ProcessorAsHandler<C: Command> {
    processor: Arc<dyn Processor<Message<C>, C::Response>>,
}

#[async_trait]
impl<C> CommandHandler<C> for ProcessorAsHandler<C>
where
    C: Command,
    Message<C>: Clone + Debug,
    C::Response: Send + Sync + 'static,
{
    async fn handle(&self, command: Message<C>, ctx: &ProcessingContext) -> Result<C::Response, MessagingError> {
        self.processor.process(command, ctx).await
    }
}

/// Decorates a command handler per `config`, with no validator attached.
pub fn decorate_command<C>(
    handler: Arc<dyn CommandHandler<C>>,
    config: &PipelineConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    circuit_breakers: &CircuitBreakerRegistry,
) -> Arc<dyn CommandHandler<C>>
where
    C: Command,
    Message<C>: Clone + Debug,
    C::Response: Send + Sync + 'static,
{
    decorate_command_validated(handler, config, clock, metrics, circuit_breakers, None)
}

/// Decorates a command handler per `config`, additionally validating every
/// request with `validator` before it reaches the handler (and before any
/// retry attempt).
pub fn decorate_command_validated<C>(
    handler: Arc<dyn CommandHandler<C>>,
    config: &PipelineConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    circuit_breakers: &CircuitBreakerRegistry,
    validator: Option<Arc<dyn Validator<Message<C>>>>,
) -> Arc<dyn CommandHandler<C>>
where
    C: Command,
    Message<C>: Clone + Debug,
    C::Response: Send + Sync + 'static,
{
    let base: Arc<dyn Processor<Message<C>, C::Response>> = Arc::new(HandlerAsProcessor { handler });
    let processor = wire(base, std::any::type_name::<C>(), config, clock, metrics, circuit_breakers, validator);
    Arc::new(ProcessorAsHandler { processor })
}

struct QueryHandlerAsProcessor<Q: Query> {
    handler: Arc<dyn QueryHandler<Q>>,
}

#[async_trait]
impl<Q> Processor<Message<Q>, Q::Response> for QueryHandlerAsProcessor<Q>
where
    Q: Query,
    Message<Q>: Clone + Debug,
    Q::Response: Send + Sync + 'static,
{
    async fn process(&self, request: Message<Q>, ctx: &ProcessingContext) -> Result<Q::Response, MessagingError> {
        self.handler.handle(request, ctx).await
    }
}

struct ProcessorAsQueryHandler<Q: Query> {
    processor: Arc<dyn Processor<Message<Q>, Q::Response>>,
}

#[async_trait]
impl<Q> QueryHandler<Q> for ProcessorAsQueryHandler<Q>
where
    Q: Query,
    Message<Q>: Clone + Debug,
    Q::Response: Send + Sync + 'static,
{
    async fn handle(&self, query: Message<Q>, ctx: &ProcessingContext) -> Result<Q::Response, MessagingError> {
        self.processor.process(query, ctx).await
    }
}

/// Decorates a query handler per `config`, the query analogue of
/// [`decorate_command`]. Queries are read-only, so there is no dead-letter
/// sink here, only the observer/metrics/logging/retry surface.
pub fn decorate_query<Q>(
    handler: Arc<dyn QueryHandler<Q>>,
    config: &PipelineConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    circuit_breakers: &CircuitBreakerRegistry,
) -> Arc<dyn QueryHandler<Q>>
where
    Q: Query,
    Message<Q>: Clone + Debug,
    Q::Response: Send + Sync + 'static,
{
    let base: Arc<dyn Processor<Message<Q>, Q::Response>> = Arc::new(QueryHandlerAsProcessor { handler });
    let processor = wire(base, std::any::type_name::<Q>(), config, clock, metrics, circuit_breakers, None);
    Arc::new(ProcessorAsQueryHandler { processor })
}

struct EventHandlerAsProcessor<E: Event> {
    handler: Arc<dyn EventHandler<E>>,
}

#[async_trait]
impl<E> Processor<Message<E>, ()> for EventHandlerAsProcessor<E>
where
    E: Event,
{
    async fn process(&self, request: Message<E>, ctx: &ProcessingContext) -> Result<(), MessagingError> {
        self.handler.handle(request, ctx).await
    }
}

struct ProcessorAsEventHandler<E: Event> {
    processor: Arc<dyn Processor<Message<E>, ()>>,
}

#[async_trait]
impl<E> EventHandler<E> for ProcessorAsEventHandler<E>
where
    E: Event,
{
    async fn handle(&self, event: Message<E>, ctx: &ProcessingContext) -> Result<(), MessagingError> {
        self.processor.process(event, ctx).await
    }
}

/// Decorates an event handler per `config`, the event analogue of
/// [`decorate_command`]. `Event: Clone` already, so `Message<E>` satisfies
/// the pipeline's `Req: Clone` bound with no extra work from the caller.
pub fn decorate_event<E>(
    handler: Arc<dyn EventHandler<E>>,
    config: &PipelineConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsCollector>,
    circuit_breakers: &CircuitBreakerRegistry,
) -> Arc<dyn EventHandler<E>>
where
    E: Event,
{
    let base: Arc<dyn Processor<Message<E>, ()>> = Arc::new(EventHandlerAsProcessor { handler });
    let processor = wire(base, std::any::type_name::<E>(), config, clock, metrics, circuit_breakers, None);
    Arc::new(ProcessorAsEventHandler { processor })
}
