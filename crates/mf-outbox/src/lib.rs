//! Outbox Processor: transactional-outbox publishing with polling
//! background dispatch, retry backoff, and a high-priority bypass.

pub mod destination;
pub mod dispatcher;
pub mod entry;
pub mod processor;
pub mod store;
pub mod store_sqlx;

pub use destination::{HttpDestinationSender, OutboxDestinationSender};
pub use dispatcher::OutboxDispatcher;
pub use entry::{OutboxEntry, OutboxStatus, PublishOptions};
pub use processor::{OutboxProcessor, HIGH_PRIORITY_THRESHOLD};
pub use store::{InMemoryOutboxStore, OutboxStore};
pub use store_sqlx::SqlxOutboxStore;
