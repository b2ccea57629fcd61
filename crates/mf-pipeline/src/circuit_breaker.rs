//! Circuit breaker decorator: `Closed -> Open -> HalfOpen -> Closed`.
//!
//! Adapted from `fc_router::mediator::CircuitBreaker`, generalized from its
//! HTTP-specific single-instance shape to wrap any `Processor`. State
//! transition rules are identical: failures accumulate in `Closed`; hitting
//! `failure_threshold` (with at least `minimum_throughput` samples seen)
//! opens the breaker; after `break_duration` elapses, the next call probes
//! in `HalfOpen`; a success there closes it, a failure reopens it.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use mf_core::{Clock, MessagingError, ProcessingContext, Processor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub minimum_throughput: u32,
    pub break_duration: Duration,
}

struct BreakerState {
    state: CircuitState,
    opened_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Point-in-time call counters for one breaker, queryable by name through
/// [`CircuitBreakerRegistry`].
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub failure_rate: f64,
}

pub struct CircuitBreaker {
    clock: Arc<dyn Clock>,
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerState>,
    failure_count: AtomicU32,
    sample_count: AtomicU32,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(clock: Arc<dyn Clock>, config: CircuitBreakerConfig) -> Self {
        Self {
            clock,
            config,
            inner: RwLock::new(BreakerState {
                state: CircuitState::Closed,
                opened_at: None,
            }),
            failure_count: AtomicU32::new(0),
            sample_count: AtomicU32::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.read().state
    }

    /// Snapshot of this breaker's call counters, named for a
    /// [`CircuitBreakerRegistry`] lookup.
    pub fn stats(&self, name: &str) -> CircuitBreakerStats {
        let successful = self.successful_calls.load(Ordering::SeqCst);
        let failed = self.failed_calls.load(Ordering::SeqCst);
        let rejected = self.rejected_calls.load(Ordering::SeqCst);
        let total = successful + failed;
        CircuitBreakerStats {
            name: name.to_string(),
            state: self.state(),
            successful_calls: successful,
            failed_calls: failed,
            rejected_calls: rejected,
            failure_rate: if total == 0 { 0.0 } else { failed as f64 / total as f64 },
        }
    }

    fn allow_request(&self, name: &str) -> Result<(), MessagingError> {
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::HalfOpen => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|opened| self.clock.now() - opened)
                    .unwrap_or_default();
                if elapsed >= chrono::Duration::from_std(self.config.break_duration).unwrap_or_default() {
                    inner.state = CircuitState::HalfOpen;
                    Ok(())
                } else {
                    self.rejected_calls.fetch_add(1, Ordering::SeqCst);
                    Err(MessagingError::CircuitOpen(name.to_string()))
                }
            }
        }
    }

    fn record_success(&self) {
        self.successful_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                self.failure_count.store(0, Ordering::SeqCst);
                self.sample_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        self.failed_calls.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.write();
        match inner.state {
            CircuitState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                let samples = self.sample_count.fetch_add(1, Ordering::SeqCst) + 1;
                if samples >= self.config.minimum_throughput && failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(self.clock.now());
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(self.clock.now());
            }
            CircuitState::Open => {}
        }
    }
}

/// By-name registry of breakers, mirroring `fc_router::circuit_breaker_registry`:
/// one breaker per endpoint/handler name, created lazily on first use and
/// queryable for dashboards or health checks without threading a breaker
/// handle through every call site.
pub struct CircuitBreakerRegistry {
    clock: Arc<dyn Clock>,
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(clock: Arc<dyn Clock>, config: CircuitBreakerConfig) -> Self {
        Self {
            clock,
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `name`, creating it with this registry's
    /// shared config on first request.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }
        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.clock.clone(), self.config.clone())))
            .clone()
    }

    pub fn stats(&self, name: &str) -> Option<CircuitBreakerStats> {
        self.breakers.read().get(name).map(|breaker| breaker.stats(name))
    }

    pub fn all_stats(&self) -> HashMap<String, CircuitBreakerStats> {
        self.breakers
            .read()
            .iter()
            .map(|(name, breaker)| (name.clone(), breaker.stats(name)))
            .collect()
    }
}

pub struct CircuitBreakerDecorator<Req, Res> {
    name: String,
    breaker: Arc<CircuitBreaker>,
    inner: Arc<dyn Processor<Req, Res>>,
}

impl<Req, Res> CircuitBreakerDecorator<Req, Res> {
    pub fn new(name: impl Into<String>, breaker: Arc<CircuitBreaker>, inner: Arc<dyn Processor<Req, Res>>) -> Self {
        Self {
            name: name.into(),
            breaker,
            inner,
        }
    }
}

#[async_trait]
impl<Req, Res> Processor<Req, Res> for CircuitBreakerDecorator<Req, Res>
where
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    async fn process(&self, request: Req, ctx: &ProcessingContext) -> Result<Res, MessagingError> {
        self.breaker.allow_request(&self.name)?;
        match self.inner.process(request, ctx).await {
            Ok(res) => {
                self.breaker.record_success();
                Ok(res)
            }
            Err(err) => {
                self.breaker.record_failure();
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mf_core::{CancellationToken, Envelope, FakeClock, SystemClock};

    struct AlwaysFail;
    #[async_trait]
    impl Processor<(), ()> for AlwaysFail {
        async fn process(&self, _r: (), _c: &ProcessingContext) -> Result<(), MessagingError> {
            Err(MessagingError::Handler(anyhow::anyhow!("boom")))
        }
    }

    struct AlwaysOk;
    #[async_trait]
    impl Processor<(), ()> for AlwaysOk {
        async fn process(&self, _r: (), _c: &ProcessingContext) -> Result<(), MessagingError> {
            Ok(())
        }
    }

    fn ctx() -> ProcessingContext {
        ProcessingContext::new(Envelope::new(&SystemClock), CancellationToken::new())
    }

    #[tokio::test]
    async fn opens_after_threshold_and_rejects_immediately() {
        let config = CircuitBreakerConfig {
            failure_threshold: 2,
            minimum_throughput: 1,
            break_duration: Duration::from_secs(30),
        };
        let breaker = Arc::new(CircuitBreaker::new(Arc::new(SystemClock), config));
        let decorator = CircuitBreakerDecorator::new("svc", breaker.clone(), Arc::new(AlwaysFail));

        let _ = decorator.process((), &ctx()).await;
        let _ = decorator.process((), &ctx()).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = decorator.process((), &ctx()).await.unwrap_err();
        assert!(matches!(err, MessagingError::CircuitOpen(_)));
    }

    #[tokio::test]
    async fn half_open_success_closes_the_breaker() {
        let fake_clock = FakeClock::new(Utc::now());
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            minimum_throughput: 1,
            break_duration: Duration::from_secs(10),
        };
        let breaker = Arc::new(CircuitBreaker::new(fake_clock.clone(), config));

        let failing = CircuitBreakerDecorator::new("svc", breaker.clone(), Arc::new(AlwaysFail));
        let _ = failing.process((), &ctx()).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        fake_clock.advance(chrono::Duration::seconds(11));
        let succeeding = CircuitBreakerDecorator::new("svc", breaker.clone(), Arc::new(AlwaysOk));
        succeeding.process((), &ctx()).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn registry_tracks_call_counts_by_name() {
        let config = CircuitBreakerConfig {
            failure_threshold: 1,
            minimum_throughput: 1,
            break_duration: Duration::from_secs(30),
        };
        let registry = CircuitBreakerRegistry::new(Arc::new(SystemClock), config);

        let breaker = registry.get_or_create("orders.pack");
        let failing = CircuitBreakerDecorator::new("orders.pack", breaker.clone(), Arc::new(AlwaysFail));
        let _ = failing.process((), &ctx()).await;
        assert!(matches!(failing.process((), &ctx()).await.unwrap_err(), MessagingError::CircuitOpen(_)));

        let stats = registry.stats("orders.pack").unwrap();
        assert_eq!(stats.failed_calls, 1);
        assert_eq!(stats.rejected_calls, 1);
        assert_eq!(stats.state, CircuitState::Open);

        assert!(registry.stats("unknown.endpoint").is_none());
        assert_eq!(registry.all_stats().len(), 1);

        // a second lookup by the same name returns the same breaker, not a fresh one
        assert!(Arc::ptr_eq(&breaker, &registry.get_or_create("orders.pack")));
    }
}
