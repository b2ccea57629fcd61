//! Query Processor: same serialization and disposal discipline as the
//! command processor, but every dispatch always returns a typed response.
//! Result caching is explicitly a decorator concern (a `mf-pipeline` stage
//! wrapping the resolved handler), not something built into this core.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use mf_core::{
    CancellationToken, HandlerRegistry, Message, MessagingError, MetricsCollector,
    ProcessingContext, Query,
};

pub struct QueryProcessor {
    registry: Arc<HandlerRegistry>,
    serialization: Semaphore,
    disposed: AtomicBool,
    metrics: Arc<MetricsCollector>,
}

impl QueryProcessor {
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

    pub async fn send<Q: Query>(&self, query: Message<Q>, cancellation: CancellationToken) -> Result<Q::Response, MessagingError> {
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

        let handler = match self.registry.resolve_query::<Q>() {
            Ok(handler) => handler,
            Err(err) => {
                drop(permit);
                return Err(err);
            }
        };

        let ctx = ProcessingContext::new(query.envelope.clone(), cancellation);
        let started = Instant::now();
        let result = handler.handle(query, &ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => self.metrics.record_success(elapsed_ms),
            Err(_) => self.metrics.record_failure(elapsed_ms),
        }

        drop(permit);
        result
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}
