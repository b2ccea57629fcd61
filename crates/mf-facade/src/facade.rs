//! The composed messaging surface: one [`mf_core::HandlerRegistry`] shared
//! by every processor, so a handler registered once is reachable whether
//! it's invoked directly (command/query/event) or durably (queue/outbox
//! /inbox). Construct one with [`crate::MessagingFacadeBuilder`].
//!
//! Sagas are deliberately not a field here: `SagaOrchestrator<D>` is
//! generic per saga data type, so one facade instance can't hold an
//! unbounded number of distinct orchestrators behind a single type. An
//! application builds its own `SagaOrchestrator<D>` values directly from
//! `mf-saga`, handing them the facade's `handler_registry`'s sibling
//! building blocks (clock, stores) where it needs them.

use std::fmt::Debug;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use mf_config::PipelineConfig;
use mf_core::{Clock, Command, CommandHandler, Event, EventHandler, HandlerRegistry, Message, MessagingError, MetricsCollector, Query, QueryHandler};
use mf_cqrs::{CommandProcessor, QueryProcessor};
use mf_event::EventBus;
use mf_inbox::InboxProcessor;
use mf_outbox::OutboxProcessor;
use mf_pipeline::{CircuitBreakerRegistry, Validator};
use mf_queue::QueueProcessor;

use crate::pipeline::{decorate_command_validated, decorate_event, decorate_query};

/// Owns the shared handler registry and every non-saga processor, all
/// wired against it by [`crate::MessagingFacadeBuilder::build`]. Also owns
/// the pipeline configuration, clock, and circuit breaker registry that
/// back the `register_*` convenience methods, so an application can
/// register a handler hardened by the configured decorator chain without
/// assembling the chain itself.
pub struct MessagingFacade {
    pub handler_registry: Arc<HandlerRegistry>,
    pub commands: CommandProcessor,
    pub queries: QueryProcessor,
    pub events: EventBus,
    pub queue: QueueProcessor,
    pub outbox: OutboxProcessor,
    pub inbox: InboxProcessor,
    pub pipeline_config: PipelineConfig,
    pub clock: Arc<dyn Clock>,
    pub metrics: Arc<MetricsCollector>,
    pub circuit_breakers: Arc<CircuitBreakerRegistry>,
}

impl MessagingFacade {
    /// Starts the outbox dispatcher and the inbox cleanup sweep. Queue
    /// workers are started individually via `queue.start_queue(name)`
    /// since a queue only exists once something has enqueued to it.
    pub async fn start(&self) {
        self.outbox.start().await;
        self.inbox.start_cleanup().await;
    }

    /// Stops the outbox dispatcher, the inbox cleanup sweep, and every
    /// currently-running queue worker, draining in-flight work first.
    pub async fn stop(&self) {
        self.outbox.stop().await;
        self.inbox.stop_cleanup().await;
        for queue_name in self.queue.active_queues() {
            self.queue.stop_queue(&queue_name).await;
        }
    }

    /// Decorates `handler` per `self.pipeline_config` and registers it for
    /// direct command dispatch.
    pub fn register_command<C>(&self, handler: Arc<dyn CommandHandler<C>>) -> Result<(), MessagingError>
    where
        C: Command,
        Message<C>: Clone + Debug,
        C::Response: Send + Sync + 'static,
    {
        self.register_command_validated(handler, None)
    }

    /// Like [`Self::register_command`], additionally validating every
    /// request with `validator` before it reaches the handler.
    pub fn register_command_validated<C>(
        &self,
        handler: Arc<dyn CommandHandler<C>>,
        validator: Option<Arc<dyn Validator<Message<C>>>>,
    ) -> Result<(), MessagingError>
    where
        C: Command,
        Message<C>: Clone + Debug,
        C::Response: Send + Sync + 'static,
    {
        let decorated = decorate_command_validated(
            handler,
            &self.pipeline_config,
            self.clock.clone(),
            self.metrics.clone(),
            &self.circuit_breakers,
            validator,
        );
        self.handler_registry.register_command::<C>(decorated)
    }

    /// Decorates `handler` per `self.pipeline_config` and registers it for
    /// direct query dispatch.
    pub fn register_query<Q>(&self, handler: Arc<dyn QueryHandler<Q>>) -> Result<(), MessagingError>
    where
        Q: Query,
        Message<Q>: Clone + Debug,
        Q::Response: Send + Sync + 'static,
    {
        let decorated = decorate_query(handler, &self.pipeline_config, self.clock.clone(), self.metrics.clone(), &self.circuit_breakers);
        self.handler_registry.register_query::<Q>(decorated)
    }

    /// Decorates `handler` per `self.pipeline_config` and subscribes it to
    /// direct event dispatch.
    pub fn register_event<E>(&self, handler: Arc<dyn EventHandler<E>>)
    where
        E: Event,
    {
        let decorated = decorate_event(handler, &self.pipeline_config, self.clock.clone(), self.metrics.clone(), &self.circuit_breakers);
        self.handler_registry.register_event::<E>(decorated);
    }

    /// Decorates `handler` per `self.pipeline_config` and registers it for
    /// queue redelivery. Since the queue resolves handlers from the same
    /// shared registry, redelivered commands run through the same
    /// decorator chain as a direct `send`.
    pub fn register_queue_command<C>(&self, handler: Arc<dyn CommandHandler<C>>) -> Result<(), MessagingError>
    where
        C: Command + Serialize + DeserializeOwned,
        Message<C>: Clone + Debug,
        C::Response: Send + Sync + 'static,
    {
        let decorated = decorate_command_validated(
            handler,
            &self.pipeline_config,
            self.clock.clone(),
            self.metrics.clone(),
            &self.circuit_breakers,
            None,
        );
        self.queue.register_command::<C>(decorated)
    }

    /// Decorates `handler` per `self.pipeline_config` and registers it for
    /// outbox redelivery.
    pub fn register_outbox_command<C>(&self, handler: Arc<dyn CommandHandler<C>>) -> Result<(), MessagingError>
    where
        C: Command + Serialize + DeserializeOwned,
        Message<C>: Clone + Debug,
        C::Response: Send + Sync + 'static,
    {
        let decorated = decorate_command_validated(
            handler,
            &self.pipeline_config,
            self.clock.clone(),
            self.metrics.clone(),
            &self.circuit_breakers,
            None,
        );
        self.outbox.register_command::<C>(decorated)
    }

    /// Decorates `handler` per `self.pipeline_config` and subscribes it to
    /// outbox event redelivery.
    pub fn register_outbox_event<E>(&self, handler: Arc<dyn EventHandler<E>>)
    where
        E: Event + Serialize + DeserializeOwned,
    {
        let decorated = decorate_event(handler, &self.pipeline_config, self.clock.clone(), self.metrics.clone(), &self.circuit_breakers);
        self.outbox.register_event::<E>(decorated);
    }

    /// Decorates `handler` per `self.pipeline_config` and registers it for
    /// inbox redelivery.
    pub fn register_inbox_command<C>(&self, handler: Arc<dyn CommandHandler<C>>) -> Result<(), MessagingError>
    where
        C: Command + Serialize + DeserializeOwned,
        Message<C>: Clone + Debug,
        C::Response: Send + Sync + 'static,
    {
        let decorated = decorate_command_validated(
            handler,
            &self.pipeline_config,
            self.clock.clone(),
            self.metrics.clone(),
            &self.circuit_breakers,
            None,
        );
        self.inbox.register_command::<C>(decorated)
    }

    /// Decorates `handler` per `self.pipeline_config` and subscribes it to
    /// inbox event redelivery.
    pub fn register_inbox_event<E>(&self, handler: Arc<dyn EventHandler<E>>)
    where
        E: Event + Serialize + DeserializeOwned,
    {
        let decorated = decorate_event(handler, &self.pipeline_config, self.clock.clone(), self.metrics.clone(), &self.circuit_breakers);
        self.inbox.register_event::<E>(decorated);
    }
}
