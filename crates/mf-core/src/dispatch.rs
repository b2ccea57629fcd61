//! Type-erased redispatch for durable storage layers.
//!
//! The in-process [`crate::registry::HandlerRegistry`] keys handlers by
//! Rust `TypeId`, which is exactly right for a live process but cannot
//! survive a restart or a trip through a queue/outbox/inbox store — a
//! persisted entry only has a payload and a type name. A
//! [`TypeDispatchRegistry`] entry bridges the two: it deserializes a
//! stored JSON payload back into its concrete type and redelivers it
//! through the same `HandlerRegistry` used for direct dispatch, so
//! queue workers, the outbox dispatcher and the inbox processor all
//! redeliver through one path rather than three bespoke ones.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::MessagingError;
use crate::message::{Command, Event, Message};
use crate::processing::ProcessingContext;
use crate::registry::HandlerRegistry;

type DispatchFn = dyn Fn(serde_json::Value, ProcessingContext) -> BoxFuture<'static, Result<(), MessagingError>> + Send + Sync;

#[derive(Default)]
pub struct TypeDispatchRegistry {
    entries: RwLock<HashMap<String, Arc<DispatchFn>>>,
}

impl TypeDispatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `C` under `type_name`. Callers must pass the same
    /// `type_name` to `enqueue`/`publish_to_outbox`/`process_incoming`
    /// as was used here; `std::any::type_name::<C>()` is a reasonable
    /// default when no shorter stable name is needed.
    pub fn register_command<C>(&self, type_name: impl Into<String>, registry: Arc<HandlerRegistry>)
    where
        C: Command + Serialize + DeserializeOwned,
    {
        let entry: Arc<DispatchFn> = Arc::new(move |payload, ctx| {
            let registry = registry.clone();
            Box::pin(async move {
                let command: C = serde_json::from_value(payload)
                    .map_err(|e| MessagingError::Configuration(e.to_string()))?;
                let handler = registry.resolve_command::<C>()?;
                let message = Message {
                    envelope: ctx.envelope.clone(),
                    payload: command,
                };
                handler.handle(message, &ctx).await.map(|_| ())
            })
        });
        self.entries.write().insert(type_name.into(), entry);
    }

    /// Registers `E` under `type_name`; dispatch runs every registered
    /// handler sequentially (queue/outbox/inbox redelivery is a single
    /// ordered step, unlike the fan-out [`crate`]-external event bus).
    pub fn register_event<E>(&self, type_name: impl Into<String>, registry: Arc<HandlerRegistry>)
    where
        E: Event + Serialize + DeserializeOwned,
    {
        let entry: Arc<DispatchFn> = Arc::new(move |payload, ctx| {
            let registry = registry.clone();
            Box::pin(async move {
                let event: E = serde_json::from_value(payload)
                    .map_err(|e| MessagingError::Configuration(e.to_string()))?;
                let handlers = registry.resolve_events::<E>();
                for handler in handlers {
                    let message = Message {
                        envelope: ctx.envelope.clone(),
                        payload: event.clone(),
                    };
                    handler.handle(message, &ctx).await?;
                }
                Ok(())
            })
        });
        self.entries.write().insert(type_name.into(), entry);
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.entries.read().contains_key(type_name)
    }

    pub async fn dispatch(
        &self,
        type_name: &str,
        payload: serde_json::Value,
        ctx: ProcessingContext,
    ) -> Result<(), MessagingError> {
        let entry = self
            .entries
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| MessagingError::NoHandler(type_name.to_string()))?;
        entry(payload, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::SystemClock;
    use async_trait::async_trait;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ShipOrder {
        order_id: u32,
    }
    impl Command for ShipOrder {
        type Response = ();
    }

    struct ShipOrderHandler(Arc<AtomicU32>);
    #[async_trait]
    impl crate::processing::CommandHandler<ShipOrder> for ShipOrderHandler {
        async fn handle(&self, command: Message<ShipOrder>, _ctx: &ProcessingContext) -> Result<(), MessagingError> {
            self.0.fetch_add(command.payload.order_id, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn redelivers_a_serialized_command_by_type_name() {
        let handler_registry = Arc::new(HandlerRegistry::new());
        let seen = Arc::new(AtomicU32::new(0));
        handler_registry
            .register_command::<ShipOrder>(Arc::new(ShipOrderHandler(seen.clone())))
            .unwrap();

        let dispatch_registry = TypeDispatchRegistry::new();
        dispatch_registry.register_command::<ShipOrder>("ShipOrder", handler_registry);

        let clock = SystemClock;
        let ctx = ProcessingContext::new(crate::message::Envelope::new(&clock), Default::default());
        let payload = serde_json::json!({ "order_id": 42 });
        dispatch_registry.dispatch("ShipOrder", payload, ctx).await.unwrap();

        assert_eq!(seen.load(Ordering::SeqCst), 42);
    }

    #[tokio::test]
    async fn unregistered_type_name_surfaces_no_handler() {
        let dispatch_registry = TypeDispatchRegistry::new();
        let clock = SystemClock;
        let ctx = ProcessingContext::new(crate::message::Envelope::new(&clock), Default::default());
        let err = dispatch_registry
            .dispatch("Unknown", serde_json::json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::NoHandler(_)));
    }
}
