//! Polling dispatch: claims a batch of due entries and dispatches each
//! with bounded parallelism up to the number of logical CPUs. Also used
//! directly (outside the poll loop) for the high-priority bypass, which
//! claims and dispatches a single entry immediately.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use uuid::Uuid;

use mf_background::PollingService;
use mf_core::{CancellationToken, Clock, ProcessingContext, TypeDispatchRegistry};

use crate::destination::OutboxDestinationSender;
use crate::entry::OutboxEntry;
use crate::store::OutboxStore;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_RETRY_DELAY: StdDuration = StdDuration::from_secs(300);

#[derive(Clone)]
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    dispatch: Arc<TypeDispatchRegistry>,
    destination_sender: Option<Arc<dyn OutboxDestinationSender>>,
    clock: Arc<dyn Clock>,
    semaphore: Arc<Semaphore>,
    batch_size: usize,
    max_retry_delay: StdDuration,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        dispatch: Arc<TypeDispatchRegistry>,
        destination_sender: Option<Arc<dyn OutboxDestinationSender>>,
        clock: Arc<dyn Clock>,
        parallelism: usize,
    ) -> Self {
        Self {
            store,
            dispatch,
            destination_sender,
            clock,
            semaphore: Arc::new(Semaphore::new(parallelism.max(1))),
            batch_size: DEFAULT_BATCH_SIZE,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
        }
    }

    pub fn with_defaults(
        store: Arc<dyn OutboxStore>,
        dispatch: Arc<TypeDispatchRegistry>,
        destination_sender: Option<Arc<dyn OutboxDestinationSender>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let parallelism = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self::new(store, dispatch, destination_sender, clock, parallelism)
    }

    /// Dispatches a single already-claimed entry: local redispatch via
    /// the handler registry when `destination` is unset, otherwise the
    /// external sender. Settles the entry in the store afterward.
    pub async fn dispatch_one(&self, entry: OutboxEntry) {
        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let mut envelope = mf_core::Envelope::new(self.clock.as_ref());
        envelope.correlation_id = entry.correlation_id;
        envelope.causation_id = entry.causation_id;
        let ctx = ProcessingContext::new(envelope, CancellationToken::new());

        let result = if let Some(destination) = entry.destination.as_deref() {
            match &self.destination_sender {
                Some(sender) => sender.send(destination, &entry.type_name, &entry.payload).await,
                None => Err(mf_core::MessagingError::Configuration(format!(
                    "outbox entry {} has destination {destination} but no sender is configured",
                    entry.id
                ))),
            }
        } else {
            self.dispatch.dispatch(&entry.type_name, entry.payload.clone(), ctx).await
        };

        match result {
            Ok(()) => {
                if let Err(err) = self.store.mark_completed(entry.id).await {
                    tracing::warn!(entry = %entry.id, error = %err, "failed to mark outbox entry completed");
                }
            }
            Err(err) => self.handle_failure(entry, err).await,
        }
    }

    async fn handle_failure(&self, entry: OutboxEntry, err: mf_core::MessagingError) {
        let retry_count = entry.retry_count + 1;
        tracing::warn!(entry = %entry.id, error = %err, retry_count, "outbox dispatch failed");

        if !err.classify().is_retryable() {
            if let Err(err) = self.store.mark_failed(entry.id).await {
                tracing::error!(entry = %entry.id, error = %err, "failed to mark outbox entry failed");
            }
            return;
        }

        if retry_count >= entry.max_retries {
            if let Err(err) = self.store.mark_failed(entry.id).await {
                tracing::error!(entry = %entry.id, error = %err, "failed to mark outbox entry failed");
            }
            return;
        }

        let mut retried = entry.clone();
        retried.retry_count = retry_count;
        let delay = retried.backoff_delay(self.max_retry_delay);
        let next_retry_at = self.clock.now() + chrono::Duration::from_std(delay).unwrap_or_default();

        if let Err(err) = self.store.mark_retry(entry.id, retry_count, next_retry_at).await {
            tracing::error!(entry = %entry.id, error = %err, "failed to schedule outbox retry");
        }
    }

    /// Claims due entries up to `try_claim` for the high-priority bypass
    /// to call directly without waiting for the next poll.
    pub async fn dispatch_now(&self, id: Uuid) {
        if let Ok(Some(entry)) = self.store.try_claim(id).await {
            self.dispatch_one(entry).await;
        }
    }
}

#[async_trait]
impl PollingService for OutboxDispatcher {
    async fn poll_once(&self) -> bool {
        let now = self.clock.now();
        let batch = match self.store.claim_batch(now, self.batch_size).await {
            Ok(batch) => batch,
            Err(err) => {
                tracing::warn!(error = %err, "outbox store error while claiming batch");
                return false;
            }
        };

        if batch.is_empty() {
            return false;
        }

        let mut handles = Vec::with_capacity(batch.len());
        for entry in batch {
            let dispatcher = self.clone();
            handles.push(tokio::spawn(async move { dispatcher.dispatch_one(entry).await }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        true
    }

    fn name(&self) -> &str {
        "outbox-dispatcher"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use mf_core::{Command, CommandHandler, FakeClock, HandlerRegistry, Message, MessagingError, ProcessingContext};
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::entry::PublishOptions;
    use crate::store::InMemoryOutboxStore;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ChargeCard {
        amount: u32,
    }
    impl Command for ChargeCard {
        type Response = ();
    }

    struct FlakyChargeHandler(Arc<AtomicU32>);
    #[async_trait]
    impl CommandHandler<ChargeCard> for FlakyChargeHandler {
        async fn handle(&self, _command: Message<ChargeCard>, _ctx: &ProcessingContext) -> Result<(), MessagingError> {
            if self.0.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(MessagingError::Handler(anyhow::anyhow!("downstream hiccup")))
            } else {
                Ok(())
            }
        }
    }

    /// Reproduces the backoff timeline: fail at t0 (retry at t0+2s), fail
    /// at t0+2s (retry at t0+6s), succeed at t0+6s.
    #[tokio::test]
    async fn failing_entry_backs_off_exponentially_then_completes() {
        let fake_clock = FakeClock::new(Utc::now());
        let clock: Arc<dyn Clock> = fake_clock.clone();
        let store = Arc::new(InMemoryOutboxStore::new());
        let dispatch = Arc::new(TypeDispatchRegistry::new());
        let handler_registry = Arc::new(HandlerRegistry::new());
        let attempts = Arc::new(AtomicU32::new(0));

        handler_registry.register_command::<ChargeCard>(Arc::new(FlakyChargeHandler(attempts.clone()))).unwrap();
        dispatch.register_command::<ChargeCard>(std::any::type_name::<ChargeCard>(), handler_registry.clone());

        let dispatcher = OutboxDispatcher::with_defaults(store.clone(), dispatch, None, clock.clone());

        let t0 = clock.now();
        let payload = serde_json::to_value(ChargeCard { amount: 100 }).unwrap();
        let entry = OutboxEntry::new(std::any::type_name::<ChargeCard>(), payload, t0, PublishOptions::default());
        let id = entry.id;
        store.add(entry).await.unwrap();

        // Attempt 1, fails at t0: retry scheduled for t0 + 2s.
        assert!(dispatcher.poll_once().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(store.status_of(id), Some(crate::entry::OutboxStatus::Pending));

        // Before t0 + 2s the entry isn't due yet.
        assert!(!dispatcher.poll_once().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);

        fake_clock.advance(chrono::Duration::seconds(2));

        // Attempt 2, fails at t0 + 2s: retry scheduled for t0 + 6s.
        assert!(dispatcher.poll_once().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(store.status_of(id), Some(crate::entry::OutboxStatus::Pending));

        fake_clock.advance(chrono::Duration::seconds(4));

        // Attempt 3, succeeds at t0 + 6s.
        assert!(dispatcher.poll_once().await);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.status_of(id), Some(crate::entry::OutboxStatus::Completed));
    }

    struct AlwaysBusinessFailure;
    #[async_trait]
    impl CommandHandler<ChargeCard> for AlwaysBusinessFailure {
        async fn handle(&self, _command: Message<ChargeCard>, _ctx: &ProcessingContext) -> Result<(), MessagingError> {
            Err(MessagingError::Business("card declined".to_string()))
        }
    }

    /// A non-retryable classification fails the entry immediately rather
    /// than scheduling a backoff retry.
    #[tokio::test]
    async fn non_retryable_failure_is_marked_failed_on_first_attempt() {
        let fake_clock = FakeClock::new(Utc::now());
        let clock: Arc<dyn Clock> = fake_clock.clone();
        let store = Arc::new(InMemoryOutboxStore::new());
        let dispatch = Arc::new(TypeDispatchRegistry::new());
        let handler_registry = Arc::new(HandlerRegistry::new());

        handler_registry.register_command::<ChargeCard>(Arc::new(AlwaysBusinessFailure)).unwrap();
        dispatch.register_command::<ChargeCard>(std::any::type_name::<ChargeCard>(), handler_registry.clone());

        let dispatcher = OutboxDispatcher::with_defaults(store.clone(), dispatch, None, clock.clone());

        let payload = serde_json::to_value(ChargeCard { amount: 100 }).unwrap();
        let entry = OutboxEntry::new(std::any::type_name::<ChargeCard>(), payload, clock.now(), PublishOptions::default());
        let id = entry.id;
        store.add(entry).await.unwrap();

        assert!(dispatcher.poll_once().await);
        assert_eq!(store.status_of(id), Some(crate::entry::OutboxStatus::Failed));
    }
}
