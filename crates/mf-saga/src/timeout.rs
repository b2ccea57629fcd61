//! Background service finding stale (non-completed, not updated
//! recently) saga instances and running their state's `OnTimeout`
//! handler, the same `mf_background::PollingService` lifecycle every
//! other background loop in this workspace uses.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use mf_background::PollingService;
use mf_core::Clock;

use crate::orchestrator::SagaOrchestrator;

pub struct SagaTimeoutMonitor<D> {
    orchestrator: Arc<SagaOrchestrator<D>>,
    clock: Arc<dyn Clock>,
    stale_after: StdDuration,
}

impl<D> SagaTimeoutMonitor<D>
where
    D: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    pub fn new(orchestrator: Arc<SagaOrchestrator<D>>, clock: Arc<dyn Clock>, stale_after: StdDuration) -> Self {
        Self { orchestrator, clock, stale_after }
    }
}

#[async_trait]
impl<D> PollingService for SagaTimeoutMonitor<D>
where
    D: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    async fn poll_once(&self) -> bool {
        let now = self.clock.now();
        let stale = match self.orchestrator.repository().find_stale(self.stale_after, now).await {
            Ok(instances) => instances,
            Err(err) => {
                tracing::warn!(error = %err, "saga repository error while scanning for stale instances");
                return false;
            }
        };

        if stale.is_empty() {
            return false;
        }

        for instance in stale {
            let correlation_id = instance.correlation_id;
            if let Err(err) = self.orchestrator.handle_timeout(instance).await {
                tracing::warn!(correlation = %correlation_id, error = %err, "saga timeout handling failed");
            }
        }

        true
    }

    fn name(&self) -> &str {
        "saga-timeout-monitor"
    }
}
