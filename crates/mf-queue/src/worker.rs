//! One worker per queue, polling its store and redispatching through the
//! handler registry. Parallelism within a single queue is always 1 —
//! sequential processing is the whole point of FIFO-among-equal-priority
//! ordering — but different queues each get their own
//! [`mf_background::BackgroundRunner`] and so run fully concurrently
//! with one another.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;

use mf_background::PollingService;
use mf_core::{CancellationToken, Clock, ProcessingContext, TypeDispatchRegistry};

use crate::entry::RejectOutcome;
use crate::store::QueueStore;

pub struct QueueWorkerConfig {
    pub visibility_timeout: StdDuration,
    pub max_requeue_attempts: u32,
    pub store_error_backoff: StdDuration,
}

impl Default for QueueWorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: StdDuration::from_secs(30),
            max_requeue_attempts: 3,
            store_error_backoff: StdDuration::from_secs(1),
        }
    }
}

pub struct QueueWorker {
    queue_name: String,
    store: Arc<dyn QueueStore>,
    dispatch: Arc<TypeDispatchRegistry>,
    clock: Arc<dyn Clock>,
    config: QueueWorkerConfig,
}

impl QueueWorker {
    pub fn new(
        queue_name: impl Into<String>,
        store: Arc<dyn QueueStore>,
        dispatch: Arc<TypeDispatchRegistry>,
        clock: Arc<dyn Clock>,
        config: QueueWorkerConfig,
    ) -> Self {
        Self {
            queue_name: queue_name.into(),
            store,
            dispatch,
            clock,
            config,
        }
    }
}

#[async_trait]
impl PollingService for QueueWorker {
    async fn poll_once(&self) -> bool {
        let now = self.clock.now();
        let entry = match self.store.dequeue(&self.queue_name, now, self.config.visibility_timeout).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return false,
            Err(err) => {
                tracing::warn!(queue = %self.queue_name, error = %err, "queue store error, backing off");
                tokio::time::sleep(self.config.store_error_backoff).await;
                return false;
            }
        };

        let mut envelope = mf_core::Envelope::new(self.clock.as_ref());
        envelope.correlation_id = entry.correlation_id;
        envelope.causation_id = entry.causation_id;
        let ctx = ProcessingContext::new(envelope, CancellationToken::new());

        let result = self.dispatch.dispatch(&entry.type_name, entry.payload.clone(), ctx).await;

        match result {
            Ok(()) => {
                if let Err(err) = self.store.ack(entry.id).await {
                    tracing::warn!(queue = %self.queue_name, error = %err, "failed to ack queue entry");
                }
            }
            Err(err) => {
                tracing::warn!(queue = %self.queue_name, error = %err, "queue handler failed, rejecting entry");
                match self.store.reject(entry.id, now, self.config.max_requeue_attempts).await {
                    Ok(RejectOutcome::Requeued) => {}
                    Ok(RejectOutcome::DeadLettered) => {
                        tracing::warn!(queue = %self.queue_name, entry = %entry.id, "entry exhausted requeue attempts, dead-lettered");
                    }
                    Err(err) => tracing::error!(queue = %self.queue_name, error = %err, "failed to reject queue entry"),
                }
            }
        }

        true
    }

    fn name(&self) -> &str {
        &self.queue_name
    }
}
