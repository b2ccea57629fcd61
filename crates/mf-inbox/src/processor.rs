use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use mf_background::{BackgroundRunner, BackoffPolicy};
use mf_core::{
    CancellationToken, Clock, Command, CommandHandler, Event, EventHandler, HandlerRegistry, Message, MessagingError,
    ProcessingContext, SystemClock, TypeDispatchRegistry,
};
use tokio::sync::Semaphore;

use crate::cleanup::InboxCleanup;
use crate::entry::{InboxEntry, ProcessOptions, DEFAULT_CLEANUP_INTERVAL, DEFAULT_RETENTION};
use crate::store::InboxStore;

/// Dedupes and sequentially dispatches inbound messages, per
/// `ProcessIncomingAsync`: a single-permit semaphore enforces parallelism
/// 1 across every call regardless of which message type arrives.
pub struct InboxProcessor {
    store: Arc<dyn InboxStore>,
    dispatch: Arc<TypeDispatchRegistry>,
    handler_registry: Arc<HandlerRegistry>,
    retention: std::time::Duration,
    clock: Arc<dyn Clock>,
    serialization: Semaphore,
    cleanup_runner: BackgroundRunner,
    disposed: AtomicBool,
}

impl InboxProcessor {
    pub fn new(store: Arc<dyn InboxStore>, handler_registry: Arc<HandlerRegistry>) -> Self {
        Self::with_retention(store, handler_registry, DEFAULT_RETENTION)
    }

    pub fn with_retention(store: Arc<dyn InboxStore>, handler_registry: Arc<HandlerRegistry>, retention: std::time::Duration) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let cleanup_runner = Self::build_cleanup_runner(&store, &clock, retention);

        Self {
            store,
            dispatch: Arc::new(TypeDispatchRegistry::new()),
            handler_registry,
            retention,
            clock,
            serialization: Semaphore::new(1),
            cleanup_runner,
            disposed: AtomicBool::new(false),
        }
    }

    fn build_cleanup_runner(store: &Arc<dyn InboxStore>, clock: &Arc<dyn Clock>, retention: std::time::Duration) -> BackgroundRunner {
        let cleanup = Arc::new(InboxCleanup::new(store.clone(), clock.clone(), retention));
        let cleanup_backoff = BackoffPolicy {
            base_interval: DEFAULT_CLEANUP_INTERVAL,
            max_interval: DEFAULT_CLEANUP_INTERVAL,
        };
        BackgroundRunner::new(cleanup, cleanup_backoff)
    }

    /// Overrides the clock both dedup-window and housekeeping-sweep
    /// timing are measured against. Rebuilds the cleanup runner so the
    /// new clock is actually observed.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.cleanup_runner = Self::build_cleanup_runner(&self.store, &clock, self.retention);
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

    /// Returns `Ok(true)` when the message was newly admitted and
    /// dispatched, `Ok(false)` when it was a duplicate within the
    /// deduplication window and therefore skipped.
    pub async fn process_incoming<C>(&self, message: Message<C>, options: ProcessOptions) -> Result<bool, MessagingError>
    where
        C: Command + Serialize + DeserializeOwned,
    {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(MessagingError::Disposed);
        }

        let payload = serde_json::to_value(&message.payload).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        let entry = InboxEntry::new(
            message.envelope.id,
            options.source.clone(),
            std::any::type_name::<C>(),
            payload.clone(),
            self.clock.now(),
            message.envelope.correlation_id,
            message.envelope.causation_id,
        );

        let window = options.deduplication_window;
        if options.require_idempotency {
            let admitted = self.store.try_admit(entry, window).await?;
            if !admitted {
                tracing::debug!(id = %message.envelope.id, "duplicate inbound message skipped");
                return Ok(false);
            }
        }

        let _permit = self
            .serialization
            .acquire()
            .await
            .map_err(|_| MessagingError::Disposed)?;

        let ctx = ProcessingContext::new(message.envelope.clone(), CancellationToken::new());
        let id = message.envelope.id;
        let result = self.dispatch.dispatch(std::any::type_name::<C>(), payload, ctx).await;

        match result {
            Ok(()) => {
                self.store.mark_processed(id, self.clock.now()).await?;
                Ok(true)
            }
            Err(err) => {
                self.store.mark_failed(id, err.to_string()).await?;
                Err(err)
            }
        }
    }

    pub async fn start_cleanup(&self) {
        self.cleanup_runner.start().await;
    }

    pub async fn stop_cleanup(&self) {
        self.cleanup_runner.stop().await;
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mf_core::SystemClock as Clk;
    use serde::Deserialize;
    use std::sync::atomic::AtomicU32;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ReceivePayment {
        amount: u32,
    }
    impl Command for ReceivePayment {
        type Response = ();
    }

    struct PaymentHandler(Arc<AtomicU32>);
    #[async_trait]
    impl CommandHandler<ReceivePayment> for PaymentHandler {
        async fn handle(&self, command: Message<ReceivePayment>, _ctx: &ProcessingContext) -> Result<(), MessagingError> {
            self.0.fetch_add(command.payload.amount, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;
    #[async_trait]
    impl CommandHandler<ReceivePayment> for FailingHandler {
        async fn handle(&self, _command: Message<ReceivePayment>, _ctx: &ProcessingContext) -> Result<(), MessagingError> {
            Err(MessagingError::Handler(anyhow::anyhow!("payment gateway rejected")))
        }
    }

    #[tokio::test]
    async fn first_delivery_is_admitted_and_dispatched() {
        let store = Arc::new(crate::store::InMemoryInboxStore::new());
        let handler_registry = Arc::new(HandlerRegistry::new());
        let total = Arc::new(AtomicU32::new(0));

        let processor = InboxProcessor::new(store, handler_registry);
        processor.register_command::<ReceivePayment>(Arc::new(PaymentHandler(total.clone()))).unwrap();

        let message = Message::new(ReceivePayment { amount: 25 }, &Clk);
        let admitted = processor.process_incoming(message, ProcessOptions::default()).await.unwrap();

        assert!(admitted);
        assert_eq!(total.load(Ordering::SeqCst), 25);
    }

    #[tokio::test]
    async fn redelivery_within_window_is_skipped() {
        let store = Arc::new(crate::store::InMemoryInboxStore::new());
        let handler_registry = Arc::new(HandlerRegistry::new());
        let total = Arc::new(AtomicU32::new(0));

        let processor = InboxProcessor::new(store, handler_registry);
        processor.register_command::<ReceivePayment>(Arc::new(PaymentHandler(total.clone()))).unwrap();

        let message = Message::new(ReceivePayment { amount: 25 }, &Clk);
        let mut redelivered = Message::new(ReceivePayment { amount: 25 }, &Clk);
        redelivered.envelope.id = message.envelope.id;

        processor.process_incoming(message, ProcessOptions::default()).await.unwrap();
        let admitted = processor.process_incoming(redelivered, ProcessOptions::default()).await.unwrap();

        assert!(!admitted);
        assert_eq!(total.load(Ordering::SeqCst), 25);
    }

    #[tokio::test]
    async fn failed_message_is_marked_failed_and_not_retried() {
        let store = Arc::new(crate::store::InMemoryInboxStore::new());
        let handler_registry = Arc::new(HandlerRegistry::new());

        let processor = InboxProcessor::new(store.clone(), handler_registry);
        processor.register_command::<ReceivePayment>(Arc::new(FailingHandler)).unwrap();

        let message = Message::new(ReceivePayment { amount: 25 }, &Clk);
        let id = message.envelope.id;
        let result = processor.process_incoming(message, ProcessOptions::default()).await;

        assert!(result.is_err());
        assert_eq!(store.status_of(id), Some(crate::entry::InboxStatus::Failed));
    }

    /// Reproduces the dedup window timeline: admitted at t0, a duplicate
    /// 30 minutes later is rejected, the same id 2 hours later (outside
    /// the 1-hour window) is re-admitted.
    #[tokio::test]
    async fn redelivery_outside_the_window_is_readmitted() {
        let fake_clock = mf_core::FakeClock::new(chrono::Utc::now());
        let clock: Arc<dyn Clock> = fake_clock.clone();
        let store = Arc::new(crate::store::InMemoryInboxStore::new());
        let handler_registry = Arc::new(HandlerRegistry::new());
        let total = Arc::new(AtomicU32::new(0));

        let processor = InboxProcessor::new(store, handler_registry).with_clock(clock.clone());
        processor.register_command::<ReceivePayment>(Arc::new(PaymentHandler(total.clone()))).unwrap();

        let options = ProcessOptions {
            deduplication_window: std::time::Duration::from_secs(60 * 60),
            ..ProcessOptions::default()
        };

        let message = Message::new(ReceivePayment { amount: 25 }, clock.as_ref());
        let id = message.envelope.id;

        let admitted = processor.process_incoming(message, options.clone()).await.unwrap();
        assert!(admitted);
        assert_eq!(total.load(Ordering::SeqCst), 25);

        fake_clock.advance(chrono::Duration::minutes(30));
        let mut duplicate = Message::new(ReceivePayment { amount: 25 }, clock.as_ref());
        duplicate.envelope.id = id;
        let admitted = processor.process_incoming(duplicate, options.clone()).await.unwrap();
        assert!(!admitted);
        assert_eq!(total.load(Ordering::SeqCst), 25);

        fake_clock.advance(chrono::Duration::hours(2));
        let mut redelivered = Message::new(ReceivePayment { amount: 25 }, clock.as_ref());
        redelivered.envelope.id = id;
        let admitted = processor.process_incoming(redelivered, options).await.unwrap();
        assert!(admitted);
        assert_eq!(total.load(Ordering::SeqCst), 50);
    }
}
