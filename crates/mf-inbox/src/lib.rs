//! Inbox Processor: dedupes inbound messages by `MessageId` within a
//! configurable window and processes admitted ones sequentially, one
//! at a time, through the handler registry.

pub mod cleanup;
pub mod entry;
pub mod processor;
pub mod store;
pub mod store_sqlx;

pub use cleanup::InboxCleanup;
pub use entry::{InboxEntry, InboxStatus, ProcessOptions, DEFAULT_CLEANUP_INTERVAL, DEFAULT_DEDUPLICATION_WINDOW, DEFAULT_RETENTION};
pub use processor::InboxProcessor;
pub use store::{InMemoryInboxStore, InboxStore};
pub use store_sqlx::SqlxInboxStore;
