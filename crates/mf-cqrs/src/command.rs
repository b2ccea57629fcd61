//! Command Processor: globally serialized command dispatch.
//!
//! Algorithm per the command processor design: acquire the serialization
//! semaphore -> check cancellation -> resolve handler (cached in the
//! registry) -> invoke -> release. A `tokio::sync::Semaphore` of size 1
//! gives exactly that "at most one command in flight, others queue"
//! discipline; bounded admission falls out of callers simply `await`ing
//! the semaphore rather than the core tracking a separate waiter count.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use mf_core::{
    CancellationToken, Command, HandlerRegistry, Message, MessagingError, MetricsCollector,
    ProcessingContext,
};

pub struct CommandProcessor {
    registry: Arc<HandlerRegistry>,
    serialization: Semaphore,
    disposed: AtomicBool,
    metrics: Arc<MetricsCollector>,
}

impl CommandProcessor {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            serialization: Semaphore::new(1),
            disposed: AtomicBool::new(false),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    /// Sends `command` for dispatch. `cancellation` is the caller's own
    /// token; signaling it while the call is queued for the serialization
    /// semaphore or while the handler is running surfaces
    /// [`MessagingError::Cancelled`] rather than waiting it out.
    pub async fn send<C: Command>(&self, command: Message<C>, cancellation: CancellationToken) -> Result<C::Response, MessagingError> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(MessagingError::Disposed);
        }

        let permit = tokio::select! {
            permit = self.serialization.acquire() => permit.map_err(|_| MessagingError::Disposed)?,
            _ = cancellation.cancelled() => return Err(MessagingError::Cancelled),
        };

        if cancellation.is_cancelled() {
            drop(permit);
            return Err(MessagingError::Cancelled);
        }

        let handler = match self.registry.resolve_command::<C>() {
            Ok(handler) => handler,
            Err(err) => {
                drop(permit);
                return Err(err);
            }
        };

        let ctx = ProcessingContext::new(command.envelope.clone(), cancellation);
        let started = Instant::now();
        let result = handler.handle(command, &ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => self.metrics.record_success(elapsed_ms),
            Err(_) => self.metrics.record_failure(elapsed_ms),
        }

        drop(permit);
        result
    }

    /// After disposal, every further `send` fails fast with
    /// [`MessagingError::Disposed`] without touching the semaphore.
    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mf_core::{CommandHandler, SystemClock as Clock};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[derive(Debug)]
    struct Increment;
    impl Command for Increment {
        type Response = u32;
    }

    struct IncrementHandler {
        counter: Arc<AtomicU32>,
        in_flight: Arc<AtomicU32>,
        max_observed_in_flight: Arc<AtomicU32>,
    }

    #[async_trait]
    impl CommandHandler<Increment> for IncrementHandler {
        async fn handle(&self, _command: Message<Increment>, _ctx: &ProcessingContext) -> Result<u32, MessagingError> {
            let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_observed_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(self.counter.fetch_add(1, Ordering::SeqCst) + 1)
        }
    }

    #[tokio::test]
    async fn no_two_invocations_overlap() {
        let registry = Arc::new(HandlerRegistry::new());
        let max_in_flight = Arc::new(AtomicU32::new(0));
        registry
            .register_command::<Increment>(Arc::new(IncrementHandler {
                counter: Arc::new(AtomicU32::new(0)),
                in_flight: Arc::new(AtomicU32::new(0)),
                max_observed_in_flight: max_in_flight.clone(),
            }))
            .unwrap();

        let processor = Arc::new(CommandProcessor::new(registry));
        let clock = Clock;

        let mut handles = Vec::new();
        for _ in 0..5 {
            let processor = processor.clone();
            let msg = Message::new(Increment, &clock);
            handles.push(tokio::spawn(async move {
                processor.send(msg, CancellationToken::new()).await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disposed_processor_rejects_sends() {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register_command::<Increment>(Arc::new(IncrementHandler {
                counter: Arc::new(AtomicU32::new(0)),
                in_flight: Arc::new(AtomicU32::new(0)),
                max_observed_in_flight: Arc::new(AtomicU32::new(0)),
            }))
            .unwrap();

        let processor = CommandProcessor::new(registry);
        processor.dispose();

        let clock = Clock;
        let msg = Message::new(Increment, &clock);
        let err = processor.send(msg, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Disposed));
    }

    #[tokio::test]
    async fn second_send_stays_pending_while_the_first_holds_the_permit() {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register_command::<Increment>(Arc::new(IncrementHandler {
                counter: Arc::new(AtomicU32::new(0)),
                in_flight: Arc::new(AtomicU32::new(0)),
                max_observed_in_flight: Arc::new(AtomicU32::new(0)),
            }))
            .unwrap();

        let processor = Arc::new(CommandProcessor::new(registry));
        let clock = Clock;

        let first = Message::new(Increment, &clock);
        let mut first_send = tokio_test::task::spawn(processor.send(first, CancellationToken::new()));
        tokio_test::assert_pending!(first_send.poll());

        let second = Message::new(Increment, &clock);
        let mut second_send = tokio_test::task::spawn(processor.send(second, CancellationToken::new()));
        tokio_test::assert_pending!(second_send.poll());
    }

    #[tokio::test]
    async fn missing_handler_surfaces_configuration_error() {
        let registry = Arc::new(HandlerRegistry::new());
        let processor = CommandProcessor::new(registry);
        let clock = Clock;
        let msg = Message::new(Increment, &clock);
        let err = processor.send(msg, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, MessagingError::NoHandler(_)));
    }
}
