//! Rate limiting decorator built on `governor`'s token bucket, the same
//! crate the teacher uses for per-endpoint throughput control
//! (`fc_router::pool::ProcessPool`).

use async_trait::async_trait;
use std::num::NonZeroU32;
use std::sync::Arc;

use governor::{clock::DefaultClock, state::{InMemoryState, NotKeyed}, Quota, RateLimiter as GovernorLimiter};

use mf_core::{MessagingError, ProcessingContext, Processor};

pub struct RateLimitDecorator<Req, Res> {
    name: String,
    limiter: GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>,
    inner: Arc<dyn Processor<Req, Res>>,
}

impl<Req, Res> RateLimitDecorator<Req, Res> {
    /// `permits_per_second` must be non-zero; `burst` is the bucket size.
    pub fn new(name: impl Into<String>, permits_per_second: u32, burst: u32, inner: Arc<dyn Processor<Req, Res>>) -> Self {
        let rate = NonZeroU32::new(permits_per_second.max(1)).unwrap();
        let burst = NonZeroU32::new(burst.max(1)).unwrap();
        let quota = Quota::per_second(rate).allow_burst(burst);
        Self {
            name: name.into(),
            limiter: GovernorLimiter::direct(quota),
            inner,
        }
    }
}

#[async_trait]
impl<Req, Res> Processor<Req, Res> for RateLimitDecorator<Req, Res>
where
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    async fn process(&self, request: Req, ctx: &ProcessingContext) -> Result<Res, MessagingError> {
        if self.limiter.check().is_err() {
            return Err(MessagingError::RateLimited(self.name.clone()));
        }
        self.inner.process(request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::{CancellationToken, Envelope, SystemClock};

    struct Noop;
    #[async_trait]
    impl Processor<(), ()> for Noop {
        async fn process(&self, _r: (), _c: &ProcessingContext) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    fn ctx() -> ProcessingContext {
        ProcessingContext::new(Envelope::new(&SystemClock), CancellationToken::new())
    }

    #[tokio::test]
    async fn rejects_once_burst_is_exhausted() {
        let decorator = RateLimitDecorator::new("svc", 1, 1, Arc::new(Noop));
        decorator.process((), &ctx()).await.unwrap();
        let err = decorator.process((), &ctx()).await.unwrap_err();
        assert!(matches!(err, MessagingError::RateLimited(_)));
    }
}
