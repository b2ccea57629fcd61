//! The `Processor` seam that every pipeline decorator wraps, plus the
//! Command/Query/Event handler traits the [`crate::registry::HandlerRegistry`]
//! resolves.

use async_trait::async_trait;

use crate::cancellation::CancellationToken;
use crate::error::MessagingError;
use crate::message::{Command, Envelope, Event, Message, Query};

/// Per-invocation context threaded through the pipeline and into handlers.
#[derive(Clone)]
pub struct ProcessingContext {
    pub envelope: Envelope,
    pub attempt: u32,
    pub cancellation: CancellationToken,
}

impl ProcessingContext {
    pub fn new(envelope: Envelope, cancellation: CancellationToken) -> Self {
        Self {
            envelope,
            attempt: 0,
            cancellation,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// A processor is anything that turns a `Req` into a `Res` or a
/// [`MessagingError`]. Pipeline decorators wrap an inner `Processor` and
/// are themselves `Processor`s, forming the "strictly nested" decorator
/// chain described in the processor pipeline design.
#[async_trait]
pub trait Processor<Req, Res>: Send + Sync {
    async fn process(&self, request: Req, ctx: &ProcessingContext) -> Result<Res, MessagingError>;
}

#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(
        &self,
        command: Message<C>,
        ctx: &ProcessingContext,
    ) -> Result<C::Response, MessagingError>;
}

#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    async fn handle(
        &self,
        query: Message<Q>,
        ctx: &ProcessingContext,
    ) -> Result<Q::Response, MessagingError>;
}

#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
    async fn handle(&self, event: Message<E>, ctx: &ProcessingContext) -> Result<(), MessagingError>;
}
