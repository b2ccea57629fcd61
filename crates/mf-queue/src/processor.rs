use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use mf_background::{BackgroundRunner, BackoffPolicy};
use mf_core::{Clock, Command, CommandHandler, CorrelationId, HandlerRegistry, MessageId, MessagingError, SystemClock, TypeDispatchRegistry};

use crate::entry::QueueEntry;
use crate::store::QueueStore;
use crate::worker::{QueueWorker, QueueWorkerConfig};

/// `EnqueueAsync`'s options bag.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: i32,
    pub correlation_id: Option<CorrelationId>,
    pub causation_id: Option<MessageId>,
}

/// The façade's queue surface: creates queues implicitly on first
/// enqueue, starts/stops a dedicated per-queue worker, and reports depth
/// and the set of currently-running workers.
///
/// Grounded on `fc_router::pool::ProcessPool`'s per-group worker
/// lifecycle (workers keyed in a `DashMap`, started lazily, stopped by
/// removing the entry and draining), adapted from per-message-group
/// ordering to per-queue-name ordering and layered on
/// [`mf_background::BackgroundRunner`] instead of a hand-rolled
/// spawn/flag pair.
pub struct QueueProcessor {
    store: Arc<dyn QueueStore>,
    dispatch: Arc<TypeDispatchRegistry>,
    handler_registry: Arc<HandlerRegistry>,
    clock: Arc<dyn Clock>,
    worker_config: QueueWorkerConfig,
    runners: DashMap<String, Arc<BackgroundRunner>>,
}

impl QueueProcessor {
    pub fn new(store: Arc<dyn QueueStore>, handler_registry: Arc<HandlerRegistry>) -> Self {
        Self {
            store,
            dispatch: Arc::new(TypeDispatchRegistry::new()),
            handler_registry,
            clock: Arc::new(SystemClock),
            worker_config: QueueWorkerConfig::default(),
            runners: DashMap::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_worker_config(mut self, config: QueueWorkerConfig) -> Self {
        self.worker_config = config;
        self
    }

    /// Registers `C`'s handler and makes `C` dispatchable from a queue
    /// entry's stored type name in one step.
    pub fn register_command<C>(&self, handler: Arc<dyn CommandHandler<C>>) -> Result<(), MessagingError>
    where
        C: Command + Serialize + DeserializeOwned,
    {
        self.handler_registry.register_command::<C>(handler)?;
        self.dispatch.register_command::<C>(std::any::type_name::<C>(), self.handler_registry.clone());
        Ok(())
    }

    pub async fn enqueue<C>(&self, queue_name: &str, command: C, options: EnqueueOptions) -> Result<(), MessagingError>
    where
        C: Command + Serialize + DeserializeOwned,
    {
        if !self.dispatch.is_registered(std::any::type_name::<C>()) {
            return Err(MessagingError::Configuration(format!(
                "no handler registered for {}; call register_command before enqueue",
                std::any::type_name::<C>()
            )));
        }
        let payload = serde_json::to_value(&command).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        let entry = QueueEntry::new(
            queue_name,
            std::any::type_name::<C>(),
            payload,
            options.priority,
            self.clock.now(),
            options.correlation_id,
            options.causation_id,
        );
        self.store.enqueue(entry).await
    }

    /// Starts a dedicated worker for `queue_name` if one isn't already
    /// running; a second call is a no-op.
    pub async fn start_queue(&self, queue_name: &str) {
        if self.runners.contains_key(queue_name) {
            return;
        }
        let worker = QueueWorker::new(
            queue_name.to_string(),
            self.store.clone(),
            self.dispatch.clone(),
            self.clock.clone(),
            QueueWorkerConfig {
                visibility_timeout: self.worker_config.visibility_timeout,
                max_requeue_attempts: self.worker_config.max_requeue_attempts,
                store_error_backoff: self.worker_config.store_error_backoff,
            },
        );
        let runner = Arc::new(BackgroundRunner::new(Arc::new(worker), BackoffPolicy::default()));
        runner.start().await;
        self.runners.insert(queue_name.to_string(), runner);
    }

    /// Stops `queue_name`'s worker, waiting for any in-flight entry to
    /// finish processing before returning.
    pub async fn stop_queue(&self, queue_name: &str) {
        if let Some((_, runner)) = self.runners.remove(queue_name) {
            runner.stop().await;
        }
    }

    pub async fn depth(&self, queue_name: &str) -> Result<u64, MessagingError> {
        self.store.depth(queue_name).await
    }

    pub fn active_queues(&self) -> Vec<String> {
        self.runners.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mf_core::ProcessingContext;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct PackOrder {
        order_id: u32,
    }
    impl Command for PackOrder {
        type Response = ();
    }

    struct PackOrderHandler(Arc<AtomicU32>);
    #[async_trait]
    impl CommandHandler<PackOrder> for PackOrderHandler {
        async fn handle(&self, command: mf_core::Message<PackOrder>, _ctx: &ProcessingContext) -> Result<(), MessagingError> {
            self.0.fetch_add(command.payload.order_id, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn enqueue_processes_through_registered_handler() {
        let store = Arc::new(crate::store::InMemoryQueueStore::new());
        let handler_registry = Arc::new(HandlerRegistry::new());
        let processed = Arc::new(AtomicU32::new(0));

        let processor = QueueProcessor::new(store, handler_registry);
        processor.register_command::<PackOrder>(Arc::new(PackOrderHandler(processed.clone()))).unwrap();

        processor
            .enqueue("fulfillment", PackOrder { order_id: 5 }, EnqueueOptions::default())
            .await
            .unwrap();

        assert_eq!(processor.depth("fulfillment").await.unwrap(), 1);

        processor.start_queue("fulfillment").await;
        assert_eq!(processor.active_queues(), vec!["fulfillment".to_string()]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processed.load(Ordering::SeqCst), 5);
        assert_eq!(processor.depth("fulfillment").await.unwrap(), 0);

        processor.stop_queue("fulfillment").await;
        assert!(processor.active_queues().is_empty());
    }

    #[tokio::test]
    async fn enqueue_without_registration_is_a_configuration_error() {
        let store = Arc::new(crate::store::InMemoryQueueStore::new());
        let handler_registry = Arc::new(HandlerRegistry::new());
        let processor = QueueProcessor::new(store, handler_registry);

        let err = processor
            .enqueue("fulfillment", PackOrder { order_id: 1 }, EnqueueOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MessagingError::Configuration(_)));
    }
}
