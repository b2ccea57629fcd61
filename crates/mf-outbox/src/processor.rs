use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use mf_background::{BackgroundRunner, BackoffPolicy};
use mf_core::{Clock, Command, CommandHandler, Event, EventHandler, HandlerRegistry, MessagingError, SystemClock, TypeDispatchRegistry};

use crate::destination::OutboxDestinationSender;
use crate::dispatcher::OutboxDispatcher;
use crate::entry::{OutboxEntry, PublishOptions};
use crate::store::OutboxStore;

/// Entries with `priority` above this bypass the next poll and are
/// dispatched immediately.
pub const HIGH_PRIORITY_THRESHOLD: i32 = 5;

pub struct OutboxProcessor {
    store: Arc<dyn OutboxStore>,
    dispatch: Arc<TypeDispatchRegistry>,
    handler_registry: Arc<HandlerRegistry>,
    destination_sender: Option<Arc<dyn OutboxDestinationSender>>,
    dispatcher: Arc<OutboxDispatcher>,
    clock: Arc<dyn Clock>,
    runner: BackgroundRunner,
}

impl OutboxProcessor {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        handler_registry: Arc<HandlerRegistry>,
        destination_sender: Option<Arc<dyn OutboxDestinationSender>>,
    ) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let dispatch = Arc::new(TypeDispatchRegistry::new());
        let (dispatcher, runner) = Self::build_dispatcher(&store, &dispatch, &destination_sender, &clock);

        Self {
            store,
            dispatch,
            handler_registry,
            destination_sender,
            dispatcher,
            clock,
            runner,
        }
    }

    fn build_dispatcher(
        store: &Arc<dyn OutboxStore>,
        dispatch: &Arc<TypeDispatchRegistry>,
        destination_sender: &Option<Arc<dyn OutboxDestinationSender>>,
        clock: &Arc<dyn Clock>,
    ) -> (Arc<OutboxDispatcher>, BackgroundRunner) {
        let dispatcher = Arc::new(OutboxDispatcher::with_defaults(
            store.clone(),
            dispatch.clone(),
            destination_sender.clone(),
            clock.clone(),
        ));
        let runner = BackgroundRunner::new(dispatcher.clone(), BackoffPolicy::default());
        (dispatcher, runner)
    }

    /// Overrides the clock the dispatcher times retry backoff against.
    /// Rebuilds the dispatcher and background runner so the new clock is
    /// actually observed; registrations already made on `self.dispatch`
    /// are untouched since `dispatch` itself isn't rebuilt.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        let (dispatcher, runner) = Self::build_dispatcher(&self.store, &self.dispatch, &self.destination_sender, &clock);
        self.dispatcher = dispatcher;
        self.runner = runner;
        self.clock = clock;
        self
    }

    pub fn register_command<C>(&self, handler: Arc<dyn CommandHandler<C>>) -> Result<(), MessagingError>
    where
        C: Command + Serialize + DeserializeOwned,
    {
        self.handler_registry.register_command::<C>(handler)?;
        self.dispatch.register_command::<C>(std::any::type_name::<C>(), self.handler_registry.clone());
        Ok(())
    }

    pub fn register_event<E>(&self, handler: Arc<dyn EventHandler<E>>)
    where
        E: Event + Serialize + DeserializeOwned,
    {
        self.handler_registry.register_event::<E>(handler);
        self.dispatch.register_event::<E>(std::any::type_name::<E>(), self.handler_registry.clone());
    }

    /// Appends a durable outbox entry for `command`. Entries with
    /// `priority` above [`HIGH_PRIORITY_THRESHOLD`] are additionally
    /// handed to the dispatch region immediately, bypassing the next
    /// poll cycle.
    pub async fn publish_to_outbox<C>(&self, command: C, options: PublishOptions) -> Result<(), MessagingError>
    where
        C: Command + Serialize + DeserializeOwned,
    {
        let payload = serde_json::to_value(&command).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        let priority = options.priority;
        let entry = OutboxEntry::new(std::any::type_name::<C>(), payload, self.clock.now(), options);
        let id = entry.id;
        self.store.add(entry).await?;

        if priority > HIGH_PRIORITY_THRESHOLD {
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move { dispatcher.dispatch_now(id).await });
        }

        Ok(())
    }

    pub async fn start(&self) {
        self.runner.start().await;
    }

    pub async fn stop(&self) {
        self.runner.stop().await;
    }
}
