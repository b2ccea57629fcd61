//! Handler Registry: maps a message's concrete type to its handler(s),
//! resolved once at registration time so the hot dispatch path never
//! reflects.
//!
//! Grounded on the teacher's pattern of caching per-type dispatch
//! artifacts instead of reflecting on every call (see the design notes
//! in the messaging spec, §9: "emit per-type dispatch stubs at
//! registration time, not reflection at each call"). Here that stub is
//! simply `Arc<dyn CommandHandler<C>>` erased behind `Arc<dyn Any + Send +
//! Sync>` and keyed by `TypeId::of::<C>()` in a [`DashMap`] — constructed
//! once in `register_*`, downcast (no further type resolution) in
//! `resolve_*`.

use std::any::{Any, TypeId};
use std::sync::Arc;

use dashmap::DashMap;

use crate::error::MessagingError;
use crate::message::{Command, Event, Query};
use crate::processing::{CommandHandler, EventHandler, QueryHandler};

// `dyn Any` only downcasts to sized concrete types, never to another trait
// object, so `Arc<dyn CommandHandler<C>>` can't be recovered directly from
// `Arc<dyn Any>`. These slot wrappers are the concrete, `'static` types we
// actually store and downcast back to; each holds the trait object we want.
struct CommandSlot<C: Command>(Arc<dyn CommandHandler<C>>);
struct QuerySlot<Q: Query>(Arc<dyn QueryHandler<Q>>);
struct EventSlot<E: Event>(Arc<dyn EventHandler<E>>);

#[derive(Default)]
pub struct HandlerRegistry {
    commands: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    queries: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    events: DashMap<TypeId, Vec<Arc<dyn Any + Send + Sync>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the sole handler for command type `C`. At most one
    /// handler may be registered per command type; a second registration
    /// is a configuration error.
    pub fn register_command<C: Command>(
        &self,
        handler: Arc<dyn CommandHandler<C>>,
    ) -> Result<(), MessagingError> {
        let key = TypeId::of::<C>();
        if self.commands.contains_key(&key) {
            return Err(MessagingError::DuplicateRegistration(
                std::any::type_name::<C>().to_string(),
            ));
        }
        self.commands
            .insert(key, Arc::new(CommandSlot::<C>(handler)) as Arc<dyn Any + Send + Sync>);
        Ok(())
    }

    pub fn resolve_command<C: Command>(&self) -> Result<Arc<dyn CommandHandler<C>>, MessagingError> {
        let key = TypeId::of::<C>();
        self.commands
            .get(&key)
            .and_then(|entry| entry.value().clone().downcast::<CommandSlot<C>>().ok())
            .map(|slot| slot.0.clone())
            .ok_or_else(|| MessagingError::NoHandler(std::any::type_name::<C>().to_string()))
    }

    /// Registers the sole handler for query type `Q`. Same at-most-one
    /// rule as commands.
    pub fn register_query<Q: Query>(&self, handler: Arc<dyn QueryHandler<Q>>) -> Result<(), MessagingError> {
        let key = TypeId::of::<Q>();
        if self.queries.contains_key(&key) {
            return Err(MessagingError::DuplicateRegistration(
                std::any::type_name::<Q>().to_string(),
            ));
        }
        self.queries
            .insert(key, Arc::new(QuerySlot::<Q>(handler)) as Arc<dyn Any + Send + Sync>);
        Ok(())
    }

    pub fn resolve_query<Q: Query>(&self) -> Result<Arc<dyn QueryHandler<Q>>, MessagingError> {
        let key = TypeId::of::<Q>();
        self.queries
            .get(&key)
            .and_then(|entry| entry.value().clone().downcast::<QuerySlot<Q>>().ok())
            .map(|slot| slot.0.clone())
            .ok_or_else(|| MessagingError::NoHandler(std::any::type_name::<Q>().to_string()))
    }

    /// Registers one more handler for event type `E`. Unlike commands and
    /// queries, any number of handlers (including zero) is legal.
    pub fn register_event<E: Event>(&self, handler: Arc<dyn EventHandler<E>>) {
        let key = TypeId::of::<E>();
        self.events
            .entry(key)
            .or_default()
            .push(Arc::new(EventSlot::<E>(handler)) as Arc<dyn Any + Send + Sync>);
    }

    /// All handlers registered for event type `E`. An empty result is not
    /// an error.
    pub fn resolve_events<E: Event>(&self) -> Vec<Arc<dyn EventHandler<E>>> {
        let key = TypeId::of::<E>();
        self.events
            .get(&key)
            .map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter_map(|h| h.clone().downcast::<EventSlot<E>>().ok())
                    .map(|slot| slot.0.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Command, Event, Message, Query};
    use crate::processing::ProcessingContext;
    use crate::time::SystemClock;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct Ping;
    impl Command for Ping {
        type Response = &'static str;
    }

    struct PingHandler;
    #[async_trait]
    impl CommandHandler<Ping> for PingHandler {
        async fn handle(&self, _: Message<Ping>, _: &ProcessingContext) -> Result<&'static str, MessagingError> {
            Ok("pong")
        }
    }

    #[derive(Debug)]
    struct GetAnswer;
    impl Query for GetAnswer {
        type Response = i32;
    }

    struct AnswerHandler;
    #[async_trait]
    impl QueryHandler<GetAnswer> for AnswerHandler {
        async fn handle(&self, _: Message<GetAnswer>, _: &ProcessingContext) -> Result<i32, MessagingError> {
            Ok(42)
        }
    }

    #[derive(Debug, Clone)]
    struct Pinged;
    impl Event for Pinged {}

    struct NoopEventHandler;
    #[async_trait]
    impl EventHandler<Pinged> for NoopEventHandler {
        async fn handle(&self, _: Message<Pinged>, _: &ProcessingContext) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    #[test]
    fn duplicate_command_registration_is_rejected() {
        let registry = HandlerRegistry::new();
        registry.register_command::<Ping>(Arc::new(PingHandler)).unwrap();
        let err = registry
            .register_command::<Ping>(Arc::new(PingHandler))
            .unwrap_err();
        assert!(matches!(err, MessagingError::DuplicateRegistration(_)));
    }

    #[tokio::test]
    async fn resolves_registered_command_handler() {
        let registry = HandlerRegistry::new();
        registry.register_command::<Ping>(Arc::new(PingHandler)).unwrap();
        let handler = registry.resolve_command::<Ping>().unwrap();
        let clock = SystemClock;
        let msg = Message::new(Ping, &clock);
        let ctx = ProcessingContext::new(msg.envelope.clone(), Default::default());
        assert_eq!(handler.handle(msg, &ctx).await.unwrap(), "pong");
    }

    #[test]
    fn unknown_command_surfaces_no_handler_error() {
        let registry = HandlerRegistry::new();
        let err = match registry.resolve_command::<Ping>() {
            Err(e) => e,
            Ok(_) => panic!("expected no handler to be registered"),
        };
        assert!(matches!(err, MessagingError::NoHandler(_)));
    }

    #[tokio::test]
    async fn query_round_trips() {
        let registry = HandlerRegistry::new();
        registry.register_query::<GetAnswer>(Arc::new(AnswerHandler)).unwrap();
        let handler = registry.resolve_query::<GetAnswer>().unwrap();
        let clock = SystemClock;
        let msg = Message::new(GetAnswer, &clock);
        let ctx = ProcessingContext::new(msg.envelope.clone(), Default::default());
        assert_eq!(handler.handle(msg, &ctx).await.unwrap(), 42);
    }

    #[test]
    fn events_allow_zero_or_many_handlers() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve_events::<Pinged>().is_empty());

        registry.register_event::<Pinged>(Arc::new(NoopEventHandler));
        registry.register_event::<Pinged>(Arc::new(NoopEventHandler));
        assert_eq!(registry.resolve_events::<Pinged>().len(), 2);
    }
}
