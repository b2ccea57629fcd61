//! Development monolith: every messaging surface (command, query,
//! event, queue, outbox, inbox) composed behind one `MessagingFacade`
//! in a single process, for exercising the framework locally without
//! standing up separate services.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::info;

use mf_config::AppConfig;
use mf_core::{Command, CommandHandler, Event, EventHandler, Message, MessagingError, ProcessingContext, Query, QueryHandler, SystemClock};
use mf_facade::MessagingFacadeBuilder;
use mf_inbox::ProcessOptions;
use mf_outbox::PublishOptions;
use mf_pipeline::Validator;
use mf_queue::EnqueueOptions;

#[derive(Parser, Debug)]
#[command(name = "mf-dev")]
#[command(about = "Messaging framework development monolith")]
struct Args {
    /// Path to a config.toml; falls back to the usual search list, then defaults.
    #[arg(long, env = "MF_CONFIG")]
    config: Option<String>,

    /// Overrides `data_dir` from the loaded config.
    #[arg(long, env = "MF_DATA_DIR")]
    data_dir: Option<String>,
}

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
    async fn handle(&self, command: Message<Greet>, _ctx: &ProcessingContext) -> Result<String, MessagingError> {
        Ok(format!("hello, {}", command.payload.name))
    }
}

struct NonEmptyName;
#[async_trait]
impl Validator<Message<Greet>> for NonEmptyName {
    async fn validate(&self, request: &Message<Greet>) -> Result<(), Vec<String>> {
        if request.payload.name.trim().is_empty() {
            Err(vec!["name must not be empty".to_string()])
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CountOrders;
impl Query for CountOrders {
    type Response = u32;
}

struct CountOrdersHandler(Arc<AtomicU32>);
#[async_trait]
impl QueryHandler<CountOrders> for CountOrdersHandler {
    async fn handle(&self, _query: Message<CountOrders>, _ctx: &ProcessingContext) -> Result<u32, MessagingError> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: u32,
}
impl Event for OrderPlaced {}

struct OrderPlacedHandler(Arc<AtomicU32>);
#[async_trait]
impl EventHandler<OrderPlaced> for OrderPlacedHandler {
    async fn handle(&self, event: Message<OrderPlaced>, _ctx: &ProcessingContext) -> Result<(), MessagingError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        info!(order_id = event.payload.order_id, "order placed event handled");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PackOrder {
    order_id: u32,
}
impl Command for PackOrder {
    type Response = ();
}

struct PackOrderHandler;
#[async_trait]
impl CommandHandler<PackOrder> for PackOrderHandler {
    async fn handle(&self, command: Message<PackOrder>, _ctx: &ProcessingContext) -> Result<(), MessagingError> {
        info!(order_id = command.payload.order_id, "packed order from queue");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    mf_core::logging::init_logging("mf-dev");
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::load()?,
    };
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }

    info!(data_dir = %config.data_dir, queue_backend = %config.queue.backend, outbox_backend = %config.outbox.backend, "starting mf-dev");

    let facade = MessagingFacadeBuilder::new(config).build().await?;
    let orders_seen = Arc::new(AtomicU32::new(0));

    // Every registration below runs through the façade's full decorator
    // chain (circuit breaker, retry, rate limiting, validation, error
    // handling, metrics, logging, correlation, tracing) per
    // `facade.pipeline_config`, not just the command surface: queue,
    // outbox and inbox redelivery resolve handlers from the same shared
    // registry these convenience methods register into.
    facade.register_command_validated(Arc::new(GreetHandler), Some(Arc::new(NonEmptyName)))?;
    facade.register_query::<CountOrders>(Arc::new(CountOrdersHandler(orders_seen.clone())))?;
    facade.register_event::<OrderPlaced>(Arc::new(OrderPlacedHandler(orders_seen.clone())));
    facade.register_queue_command::<PackOrder>(Arc::new(PackOrderHandler))?;
    facade.register_outbox_command::<PackOrder>(Arc::new(PackOrderHandler))?;
    facade.register_inbox_command::<PackOrder>(Arc::new(PackOrderHandler))?;

    facade.start().await;
    facade.queue.start_queue("fulfillment").await;

    run_demo(&facade, &orders_seen).await?;

    info!("demo sequence complete, press Ctrl+C to shut down");
    shutdown_signal().await;

    info!("shutting down");
    facade.stop().await;
    Ok(())
}

async fn run_demo(facade: &mf_facade::MessagingFacade, orders_seen: &Arc<AtomicU32>) -> Result<()> {
    let clock = SystemClock;

    let greeting = facade
        .commands
        .send(Message::new(Greet { name: "operator".to_string() }, &clock), Default::default())
        .await?;
    info!(%greeting, "command surface");

    facade
        .events
        .publish(Message::new(OrderPlaced { order_id: 1 }, &clock), Default::default())
        .await?;

    facade
        .queue
        .enqueue("fulfillment", PackOrder { order_id: 1 }, EnqueueOptions::default())
        .await?;

    facade
        .outbox
        .publish_to_outbox(PackOrder { order_id: 2 }, PublishOptions::default())
        .await?;

    facade
        .inbox
        .process_incoming(
            Message::new(PackOrder { order_id: 3 }, &clock),
            ProcessOptions { source: "demo".to_string(), ..Default::default() },
        )
        .await?;

    // Give the queue worker and outbox dispatcher one tick to drain
    // before reading the query back.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let count = facade.queries.send(Message::new(CountOrders, &clock), Default::default()).await?;
    info!(count, seen = orders_seen.load(Ordering::SeqCst), "query surface after demo events");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
