//! Builds a [`MessagingFacade`] from an [`mf_config::AppConfig`],
//! choosing an in-memory or sqlite-backed store per component based on
//! each component's `backend` field ("memory" or "sqlite").

use std::path::Path;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use mf_config::AppConfig;
use mf_core::{Clock, HandlerRegistry, MessagingError, MetricsCollector, SystemClock};
use mf_cqrs::{CommandProcessor, QueryProcessor};
use mf_event::EventBus;
use mf_inbox::{InMemoryInboxStore, InboxProcessor, InboxStore, SqlxInboxStore};
use mf_outbox::{InMemoryOutboxStore, OutboxDestinationSender, OutboxProcessor, OutboxStore, SqlxOutboxStore};
use mf_pipeline::CircuitBreakerRegistry;
use mf_queue::{InMemoryQueueStore, QueueProcessor, QueueStore, QueueWorkerConfig, SqlxQueueStore};

use crate::facade::MessagingFacade;

/// Opens (creating if missing) a sqlite database under `data_dir` named
/// `file_name`, per the component asking for a durable store.
async fn open_sqlite(data_dir: &str, file_name: &str) -> Result<SqlitePool, MessagingError> {
    std::fs::create_dir_all(data_dir).map_err(|e| MessagingError::Configuration(e.to_string()))?;
    let path = Path::new(data_dir).join(file_name);
    let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| MessagingError::Configuration(e.to_string()))
}

pub struct MessagingFacadeBuilder {
    config: AppConfig,
    destination_sender: Option<Arc<dyn OutboxDestinationSender>>,
    clock: Arc<dyn Clock>,
}

impl MessagingFacadeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            destination_sender: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Sender used for outbox entries that carry an external
    /// `destination` rather than dispatching locally. Defaults to none,
    /// which is fine as long as every published entry stays local.
    pub fn with_destination_sender(mut self, sender: Arc<dyn OutboxDestinationSender>) -> Self {
        self.destination_sender = Some(sender);
        self
    }

    /// Overrides the clock every processor (and the pipeline decorators
    /// registered through the façade) observes time through. Defaults to
    /// `SystemClock`; tests inject a `FakeClock` here to drive backoff and
    /// dedup-window timing deterministically.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn build(self) -> Result<MessagingFacade, MessagingError> {
        let config = self.config;
        let clock = self.clock;
        let registry = Arc::new(HandlerRegistry::new());

        let commands = CommandProcessor::new(registry.clone());
        let queries = QueryProcessor::new(registry.clone());

        let parallelism = if config.event_bus.max_parallelism == 0 {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
        } else {
            config.event_bus.max_parallelism
        };
        let events = EventBus::new(registry.clone(), config.event_bus.dispatch_capacity, parallelism);

        let queue_store: Arc<dyn QueueStore> = match config.queue.backend.as_str() {
            "sqlite" => {
                let pool = open_sqlite(&config.data_dir, "mf-queue.db").await?;
                SqlxQueueStore::run_migrations(&pool).await.map_err(|e| MessagingError::Configuration(e.to_string()))?;
                Arc::new(SqlxQueueStore::new(pool))
            }
            _ => Arc::new(InMemoryQueueStore::new()),
        };
        let queue = QueueProcessor::new(queue_store, registry.clone())
            .with_clock(clock.clone())
            .with_worker_config(QueueWorkerConfig {
                visibility_timeout: StdDuration::from_millis(config.queue.visibility_timeout_ms),
                max_requeue_attempts: config.queue.max_dequeue_count,
                ..QueueWorkerConfig::default()
            });

        let outbox_store: Arc<dyn OutboxStore> = match config.outbox.backend.as_str() {
            "sqlite" => {
                let pool = open_sqlite(&config.data_dir, "mf-outbox.db").await?;
                SqlxOutboxStore::run_migrations(&pool).await.map_err(|e| MessagingError::Configuration(e.to_string()))?;
                Arc::new(SqlxOutboxStore::new(pool))
            }
            _ => Arc::new(InMemoryOutboxStore::new()),
        };
        let outbox = OutboxProcessor::new(outbox_store, registry.clone(), self.destination_sender).with_clock(clock.clone());

        let inbox_store: Arc<dyn InboxStore> = match config.inbox.backend.as_str() {
            "sqlite" => {
                let pool = open_sqlite(&config.data_dir, "mf-inbox.db").await?;
                SqlxInboxStore::run_migrations(&pool).await.map_err(|e| MessagingError::Configuration(e.to_string()))?;
                Arc::new(SqlxInboxStore::new(pool))
            }
            _ => Arc::new(InMemoryInboxStore::new()),
        };
        let inbox = InboxProcessor::with_retention(inbox_store, registry.clone(), StdDuration::from_millis(config.inbox.retention_ms))
            .with_clock(clock.clone());

        let circuit_breakers = Arc::new(CircuitBreakerRegistry::new(
            clock.clone(),
            mf_pipeline::CircuitBreakerConfig {
                failure_threshold: config.pipeline.circuit_breaker.failure_threshold,
                minimum_throughput: config.pipeline.circuit_breaker.minimum_throughput,
                break_duration: StdDuration::from_millis(config.pipeline.circuit_breaker.break_duration_ms),
            },
        ));

        Ok(MessagingFacade {
            handler_registry: registry,
            commands,
            queries,
            events,
            queue,
            outbox,
            inbox,
            pipeline_config: config.pipeline,
            clock,
            metrics: Arc::new(MetricsCollector::new()),
            circuit_breakers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mf_core::{Command, CommandHandler, Message, MessagingError as Err, ProcessingContext, SystemClock};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Greet {
        name: String,
    }
    impl Command for Greet {
        type Response = String;
    }

    struct GreetHandler;
    #[async_trait]
    impl CommandHandler<Greet> for GreetHandler {
        async fn handle(&self, command: Message<Greet>, _ctx: &ProcessingContext) -> Result<String, Err> {
            Ok(format!("hello {}", command.payload.name))
        }
    }

    #[tokio::test]
    async fn default_config_builds_an_in_memory_facade() {
        let facade = MessagingFacadeBuilder::new(AppConfig::default()).build().await.unwrap();
        facade.handler_registry.register_command::<Greet>(Arc::new(GreetHandler)).unwrap();

        let clock = SystemClock;
        let message = Message::new(Greet { name: "world".to_string() }, &clock);
        let response = facade.commands.send(message, Default::default()).await.unwrap();
        assert_eq!(response, "hello world");
    }

    #[tokio::test]
    async fn queue_and_outbox_share_the_registered_command_handler() {
        let facade = MessagingFacadeBuilder::new(AppConfig::default()).build().await.unwrap();
        facade.queue.register_command::<Greet>(Arc::new(GreetHandler)).unwrap();

        facade
            .queue
            .enqueue("greetings", Greet { name: "alice".to_string() }, Default::default())
            .await
            .unwrap();
        assert_eq!(facade.queue.depth("greetings").await.unwrap(), 1);

        // The same handler is reachable through the plain command surface
        // because both were registered against the one shared registry.
        let clock = SystemClock;
        let message = Message::new(Greet { name: "bob".to_string() }, &clock);
        let response = facade.commands.send(message, Default::default()).await.unwrap();
        assert_eq!(response, "hello bob");
    }
}
