//! Event Bus: fan-out publish with bounded in-flight work.
//!
//! Grounded on `fc_router::pool::ProcessPool`'s worker-pool shape — a
//! bounded `mpsc` channel feeding a fixed number of worker tasks gated by
//! a semaphore — generalized from "one worker per message group" to "N
//! workers pulling dispatch jobs off one shared queue", since an event
//! bus has no per-group ordering requirement to preserve, only a
//! parallelism cap. Each dispatch job is one `(handler, event)` pair, so
//! a slow or failing handler only occupies one worker slot rather than
//! blocking the other handlers subscribed to the same event.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, Mutex};

use mf_core::{CancellationToken, Event, HandlerRegistry, Message, MessagingError, MetricsCollector, ProcessingContext};

/// Capacity of the internal dispatch channel. The spec's "bounded work
/// region ... default capacity >= 1000" — publishers block (rather than
/// fail) once the region is full, applying natural backpressure.
pub const DEFAULT_DISPATCH_CAPACITY: usize = 1024;

type DispatchJob = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub struct EventBus {
    registry: Arc<HandlerRegistry>,
    dispatch_tx: mpsc::Sender<DispatchJob>,
    metrics: Arc<MetricsCollector>,
    in_flight: Arc<AtomicUsize>,
}

impl EventBus {
    /// `parallelism` workers pull jobs off one shared queue of
    /// `capacity` pending dispatches. A sensible default for
    /// `parallelism` is the number of logical CPUs.
    pub fn new(registry: Arc<HandlerRegistry>, capacity: usize, parallelism: usize) -> Self {
        let (dispatch_tx, dispatch_rx) = mpsc::channel::<DispatchJob>(capacity);
        let dispatch_rx = Arc::new(Mutex::new(dispatch_rx));
        let in_flight = Arc::new(AtomicUsize::new(0));

        for worker_id in 0..parallelism.max(1) {
            let dispatch_rx = dispatch_rx.clone();
            let in_flight = in_flight.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut rx = dispatch_rx.lock().await;
                        rx.recv().await
                    };
                    let Some(job) = job else {
                        tracing::debug!(worker_id, "event dispatch worker exiting, channel closed");
                        break;
                    };
                    in_flight.fetch_add(1, Ordering::SeqCst);
                    job().await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                }
            });
        }

        Self {
            registry,
            dispatch_tx,
            metrics: Arc::new(MetricsCollector::new()),
            in_flight,
        }
    }

    /// Default construction: 1024-entry dispatch region, parallelism
    /// equal to the number of logical CPUs.
    pub fn with_defaults(registry: Arc<HandlerRegistry>) -> Self {
        let parallelism = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self::new(registry, DEFAULT_DISPATCH_CAPACITY, parallelism)
    }

    pub fn metrics(&self) -> Arc<MetricsCollector> {
        self.metrics.clone()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resolves all handlers for `E` and hands each one a dispatch job.
    /// Returns once every job has been *accepted* into the dispatch
    /// region, not once handlers have finished running. A handler
    /// failure is isolated: it is logged and recorded in `metrics`, but
    /// never cancels sibling handlers or surfaces to the publisher.
    pub async fn publish<E: Event>(&self, event: Message<E>, cancellation: CancellationToken) -> Result<(), MessagingError> {
        let handlers = self.registry.resolve_events::<E>();
        if handlers.is_empty() {
            tracing::debug!(event = std::any::type_name::<E>(), "no handlers registered for event");
            return Ok(());
        }

        let ctx = ProcessingContext::new(event.envelope.clone(), cancellation);

        for handler in handlers {
            let message = event.clone();
            let ctx = ctx.clone();
            let metrics = self.metrics.clone();

            let job: DispatchJob = Box::new(move || {
                Box::pin(async move {
                    let started = Instant::now();
                    let result = handler.handle(message, &ctx).await;
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    match result {
                        Ok(()) => metrics.record_success(elapsed_ms),
                        Err(err) => {
                            metrics.record_failure(elapsed_ms);
                            tracing::warn!(error = %err, "event handler failed");
                        }
                    }
                }) as BoxFuture<'static, ()>
            });

            self.dispatch_tx
                .send(job)
                .await
                .map_err(|_| MessagingError::Disposed)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mf_core::{EventHandler, SystemClock};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    struct OrderPlaced {
        order_id: u32,
    }
    impl Event for OrderPlaced {}

    struct CountingHandler {
        count: Arc<AtomicU32>,
        delay: Duration,
    }

    #[async_trait]
    impl EventHandler<OrderPlaced> for CountingHandler {
        async fn handle(&self, _event: Message<OrderPlaced>, _ctx: &ProcessingContext) -> Result<(), MessagingError> {
            tokio::time::sleep(self.delay).await;
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl EventHandler<OrderPlaced> for FailingHandler {
        async fn handle(&self, _event: Message<OrderPlaced>, _ctx: &ProcessingContext) -> Result<(), MessagingError> {
            Err(MessagingError::Handler(anyhow::anyhow!("boom")))
        }
    }

    #[tokio::test]
    async fn publish_without_handlers_is_not_an_error() {
        let registry = Arc::new(HandlerRegistry::new());
        let bus = EventBus::new(registry, 16, 2);
        let clock = SystemClock;
        let msg = Message::new(OrderPlaced { order_id: 1 }, &clock);
        bus.publish(msg, CancellationToken::new()).await.unwrap();
    }

    #[tokio::test]
    async fn all_subscribed_handlers_run() {
        let registry = Arc::new(HandlerRegistry::new());
        let count_a = Arc::new(AtomicU32::new(0));
        let count_b = Arc::new(AtomicU32::new(0));
        registry.register_event::<OrderPlaced>(Arc::new(CountingHandler {
            count: count_a.clone(),
            delay: Duration::from_millis(5),
        }));
        registry.register_event::<OrderPlaced>(Arc::new(CountingHandler {
            count: count_b.clone(),
            delay: Duration::from_millis(5),
        }));

        let bus = EventBus::new(registry, 16, 4);
        let clock = SystemClock;
        let msg = Message::new(OrderPlaced { order_id: 7 }, &clock);
        bus.publish(msg, CancellationToken::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count_a.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_failing_handler_does_not_prevent_others_from_running() {
        let registry = Arc::new(HandlerRegistry::new());
        let count = Arc::new(AtomicU32::new(0));
        registry.register_event::<OrderPlaced>(Arc::new(FailingHandler));
        registry.register_event::<OrderPlaced>(Arc::new(CountingHandler {
            count: count.clone(),
            delay: Duration::from_millis(1),
        }));

        let bus = EventBus::new(registry, 16, 4);
        let clock = SystemClock;
        let msg = Message::new(OrderPlaced { order_id: 9 }, &clock);
        bus.publish(msg, CancellationToken::new()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let snapshot = bus.metrics().snapshot();
        assert_eq!(snapshot.total_failure, 1);
        assert_eq!(snapshot.total_success, 1);
    }
}
