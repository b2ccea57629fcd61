//! Queue Processor and Queue Worker: durable, priority-ordered, per-queue
//! sequential work dispatch. See [`QueueProcessor`] for the façade-facing
//! surface and [`QueueWorker`] for the per-queue polling loop it manages.

pub mod entry;
pub mod processor;
pub mod store;
pub mod store_sqlx;
pub mod worker;

pub use entry::{QueueEntry, RejectOutcome};
pub use processor::{EnqueueOptions, QueueProcessor};
pub use store::{InMemoryQueueStore, QueueStore};
pub use store_sqlx::SqlxQueueStore;
pub use worker::{QueueWorker, QueueWorkerConfig};
