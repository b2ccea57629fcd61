//! Metrics decorator: measures duration and records success/failure.
//! Observes outcomes without swallowing them.

use async_trait::async_trait;
use std::sync::Arc;

use mf_core::{Clock, MessagingError, MetricsCollector, ProcessingContext, Processor};

pub struct MetricsDecorator<Req, Res> {
    clock: Arc<dyn Clock>,
    collector: Arc<MetricsCollector>,
    inner: Arc<dyn Processor<Req, Res>>,
}

impl<Req, Res> MetricsDecorator<Req, Res> {
    pub fn new(clock: Arc<dyn Clock>, collector: Arc<MetricsCollector>, inner: Arc<dyn Processor<Req, Res>>) -> Self {
        Self { clock, collector, inner }
    }
}

#[async_trait]
impl<Req, Res> Processor<Req, Res> for MetricsDecorator<Req, Res>
where
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    async fn process(&self, request: Req, ctx: &ProcessingContext) -> Result<Res, MessagingError> {
        let started = self.clock.now();
        let result = self.inner.process(request, ctx).await;
        let elapsed_ms = (self.clock.now() - started).num_milliseconds().max(0) as u64;

        match &result {
            Ok(_) => self.collector.record_success(elapsed_ms),
            Err(err) => {
                if err.classify() != mf_core::Classification::Cancelled {
                    self.collector.record_failure(elapsed_ms);
                }
                if matches!(err, MessagingError::RateLimited(_)) {
                    self.collector.record_rate_limited();
                }
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::{CancellationToken, Envelope, SystemClock};

    struct AlwaysOk;
    #[async_trait]
    impl Processor<(), ()> for AlwaysOk {
        async fn process(&self, _r: (), _c: &ProcessingContext) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn records_success_counts() {
        let collector = Arc::new(MetricsCollector::new());
        let decorator = MetricsDecorator::new(Arc::new(SystemClock), collector.clone(), Arc::new(AlwaysOk));
        let ctx = ProcessingContext::new(Envelope::new(&SystemClock), CancellationToken::new());
        decorator.process((), &ctx).await.unwrap();
        assert_eq!(collector.snapshot().total_success, 1);
    }
}
