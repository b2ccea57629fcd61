//! Housekeeping sweep removing expired `Processed` entries. Runs on its
//! own [`mf_background::BackgroundRunner`] at a fixed hourly cadence —
//! unlike the queue/outbox pollers this has no "found work, speed up"
//! signal worth reacting to, so the backoff policy's base and max
//! interval are pinned to the same value.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;

use mf_background::PollingService;
use mf_core::Clock;

use crate::store::InboxStore;

pub struct InboxCleanup {
    store: Arc<dyn InboxStore>,
    clock: Arc<dyn Clock>,
    retention: StdDuration,
}

impl InboxCleanup {
    pub fn new(store: Arc<dyn InboxStore>, clock: Arc<dyn Clock>, retention: StdDuration) -> Self {
        Self { store, clock, retention }
    }
}

#[async_trait]
impl PollingService for InboxCleanup {
    async fn poll_once(&self) -> bool {
        let cutoff = self.clock.now() - chrono::Duration::from_std(self.retention).unwrap_or_default();
        match self.store.cleanup_processed_before(cutoff).await {
            Ok(removed) => {
                if removed > 0 {
                    tracing::debug!(removed, "inbox cleanup removed expired processed entries");
                }
                false
            }
            Err(err) => {
                tracing::warn!(error = %err, "inbox cleanup store error");
                false
            }
        }
    }

    fn name(&self) -> &str {
        "inbox-cleanup"
    }
}
