//! Retry decorator: on a transient failure, retries the inner processor up
//! to `max_attempts` times using a configurable delay policy.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mf_core::{Classification, Clock, MessagingError, ProcessingContext, Processor};

#[derive(Debug, Clone)]
pub enum RetryDelayPolicy {
    Fixed(Duration),
    ExponentialWithJitter { base: Duration, max: Duration },
}

impl RetryDelayPolicy {
    fn delay_for(&self, attempt: u32, jitter: &Jitter) -> Duration {
        match self {
            RetryDelayPolicy::Fixed(d) => *d,
            RetryDelayPolicy::ExponentialWithJitter { base, max } => {
                let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
                let capped = exp.min(max.as_millis());
                let spread = (capped / 4).max(1);
                let jittered = capped + jitter.next_bounded(spread as u64) as u128;
                Duration::from_millis(jittered.min(max.as_millis()) as u64)
            }
        }
    }
}

/// Deterministic xorshift generator; avoids pulling in a dependency on
/// `rand` purely to spread retry delays, and keeps retry timing
/// reproducible under tests driven by a fake clock.
struct Jitter {
    state: AtomicU64,
}

impl Jitter {
    fn new() -> Self {
        Self {
            state: AtomicU64::new(0x9E3779B97F4A7C15),
        }
    }

    fn next_bounded(&self, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        let mut x = self.state.load(Ordering::Relaxed);
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state.store(x, Ordering::Relaxed);
        x % bound
    }
}

pub struct RetryDecorator<Req, Res> {
    inner: Arc<dyn Processor<Req, Res>>,
    clock: Arc<dyn Clock>,
    max_attempts: u32,
    delay_policy: RetryDelayPolicy,
    jitter: Jitter,
}

impl<Req, Res> RetryDecorator<Req, Res> {
    pub fn new(inner: Arc<dyn Processor<Req, Res>>, clock: Arc<dyn Clock>, max_attempts: u32, delay_policy: RetryDelayPolicy) -> Self {
        Self {
            inner,
            clock,
            max_attempts,
            delay_policy,
            jitter: Jitter::new(),
        }
    }
}

#[async_trait]
impl<Req, Res> Processor<Req, Res> for RetryDecorator<Req, Res>
where
    Req: Clone + Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    async fn process(&self, request: Req, ctx: &ProcessingContext) -> Result<Res, MessagingError> {
        let mut attempt = 0u32;
        loop {
            if ctx.cancellation.is_cancelled() {
                return Err(MessagingError::Cancelled);
            }

            let attempt_ctx = ctx.clone().with_attempt(attempt);
            match self.inner.process(request.clone(), &attempt_ctx).await {
                Ok(res) => return Ok(res),
                Err(err) => {
                    let retryable = err.classify() == Classification::Transient;
                    if !retryable || attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.delay_policy.delay_for(attempt, &self.jitter);
                    tokio::select! {
                        _ = self.clock.delay(delay) => {}
                        _ = ctx.cancellation.cancelled() => return Err(MessagingError::Cancelled),
                    }
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::{CancellationToken, Envelope, FakeClock, SystemClock};
    use std::sync::atomic::AtomicU32;
    use chrono::Utc;

    struct FlakyThenOk {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl Processor<(), &'static str> for FlakyThenOk {
        async fn process(&self, _request: (), _ctx: &ProcessingContext) -> Result<&'static str, MessagingError> {
            if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                Err(MessagingError::Handler(anyhow::anyhow!("transient blip")))
            } else {
                Ok("ok")
            }
        }
    }

    fn ctx() -> ProcessingContext {
        ProcessingContext::new(Envelope::new(&SystemClock), CancellationToken::new())
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let inner = Arc::new(FlakyThenOk {
            failures_remaining: AtomicU32::new(2),
        });
        let fake_clock = FakeClock::new(Utc::now());
        let decorator = RetryDecorator::new(inner, fake_clock.clone(), 5, RetryDelayPolicy::Fixed(Duration::from_millis(10)));

        let handle = tokio::spawn(async move { decorator.process((), &ctx()).await });
        for _ in 0..2 {
            tokio::task::yield_now().await;
            fake_clock.advance(chrono::Duration::milliseconds(10));
        }
        assert_eq!(handle.await.unwrap().unwrap(), "ok");
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        struct AlwaysValidation;
        #[async_trait]
        impl Processor<(), ()> for AlwaysValidation {
            async fn process(&self, _r: (), _c: &ProcessingContext) -> Result<(), MessagingError> {
                Err(MessagingError::Validation(vec!["bad".into()]))
            }
        }
        let decorator = RetryDecorator::new(Arc::new(AlwaysValidation), Arc::new(SystemClock), 5, RetryDelayPolicy::Fixed(Duration::from_millis(1)));
        let err = decorator.process((), &ctx()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Validation(_)));
    }

    #[tokio::test]
    async fn exhausting_attempts_surfaces_last_error() {
        let inner = Arc::new(FlakyThenOk {
            failures_remaining: AtomicU32::new(10),
        });
        let decorator = RetryDecorator::new(inner, Arc::new(SystemClock), 2, RetryDelayPolicy::Fixed(Duration::from_millis(1)));
        let err = decorator.process((), &ctx()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Handler(_)));
    }
}
