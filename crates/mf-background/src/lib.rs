//! Shared polling-service lifecycle: start/stop, adaptive idle backoff,
//! and graceful drain — the shape every outbox/inbox/saga-timeout
//! background loop in this workspace is built on.
//!
//! Grounded on `fc_scheduler::DispatchScheduler`'s `start`/`stop`/
//! `is_running` lifecycle (an `Arc<RwLock<bool>>` flag checked each tick,
//! `tokio::spawn` running a `tokio::time::interval` loop) and
//! `fc_outbox::OutboxProcessor::start`'s fixed-interval `sleep` poll loop.
//! Neither teacher loop backs off when idle; this adds that because the
//! messaging design's background-service component explicitly calls for
//! "adaptive idle backoff" alongside the lifecycle shape the teacher
//! already has.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use mf_core::CancellationToken;

/// One polling sweep. Returns whether it found and dispatched work —
/// `true` resets the backoff to `base_interval`, `false` lets it grow
/// toward `max_interval`.
#[async_trait]
pub trait PollingService: Send + Sync + 'static {
    async fn poll_once(&self) -> bool;

    fn name(&self) -> &str;
}

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_interval: Duration,
    pub max_interval: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    fn next(&self, current: Duration, found_work: bool) -> Duration {
        if found_work {
            self.base_interval
        } else {
            (current * 2).min(self.max_interval)
        }
    }
}

/// Runs a [`PollingService`] on a lifecycle managed by `start`/`stop`.
pub struct BackgroundRunner {
    service: Arc<dyn PollingService>,
    backoff: BackoffPolicy,
    cancellation: CancellationToken,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundRunner {
    pub fn new(service: Arc<dyn PollingService>, backoff: BackoffPolicy) -> Self {
        Self {
            service,
            backoff,
            cancellation: CancellationToken::new(),
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub async fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::warn!(service = self.service.name(), "background service already running");
            return;
        }

        let service = self.service.clone();
        let backoff = self.backoff.clone();
        let cancellation = self.cancellation.clone();

        let join = tokio::spawn(async move {
            let mut delay = backoff.base_interval;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancellation.cancelled() => break,
                }

                if cancellation.is_cancelled() {
                    break;
                }

                let found_work = service.poll_once().await;
                delay = backoff.next(delay, found_work);
            }
            tracing::info!(service = service.name(), "background service loop exited");
        });

        *self.handle.lock().await = Some(join);
    }

    /// Signals cancellation and waits for the in-flight poll (if any) to
    /// finish before returning — a graceful drain rather than an abort.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.cancellation.cancel();
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingService {
        polls: AtomicU32,
        work_remaining: AtomicU32,
    }

    #[async_trait]
    impl PollingService for CountingService {
        async fn poll_once(&self) -> bool {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.work_remaining.fetch_sub(1, Ordering::SeqCst) > 0
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    #[tokio::test]
    async fn stop_drains_in_flight_poll_before_returning() {
        let service = Arc::new(CountingService {
            polls: AtomicU32::new(0),
            work_remaining: AtomicU32::new(100),
        });
        let runner = BackgroundRunner::new(
            service.clone(),
            BackoffPolicy {
                base_interval: Duration::from_millis(1),
                max_interval: Duration::from_millis(10),
            },
        );

        runner.start().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        runner.stop().await;

        assert!(!runner.is_running());
        assert!(service.polls.load(Ordering::SeqCst) > 0);
    }

    #[tokio::test]
    async fn double_start_is_a_no_op() {
        let service = Arc::new(CountingService {
            polls: AtomicU32::new(0),
            work_remaining: AtomicU32::new(1),
        });
        let runner = BackgroundRunner::new(service, BackoffPolicy::default());
        runner.start().await;
        runner.start().await;
        runner.stop().await;
    }
}
