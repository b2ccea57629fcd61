//! Injectable time source so tests can drive delays and timestamps
//! deterministically instead of touching the wall clock directly.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// Abstract source of "now" and "sleep for".
///
/// All delays, timeouts, and timestamps in this crate family flow through
/// a `Clock` rather than calling `Utc::now()` / `tokio::time::sleep`
/// directly, so every polling loop, retry delay and saga timeout can be
/// driven by [`FakeClock`] in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn delay<'a>(
        &'a self,
        duration: StdDuration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>>;
}

/// Real wall-clock time source backed by `chrono`/`tokio`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn delay<'a>(
        &'a self,
        duration: StdDuration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

struct FakeClockState {
    now: DateTime<Utc>,
}

/// A manually-advanceable clock for deterministic tests.
///
/// `delay` does not actually sleep; it waits on a [`Notify`] that is woken
/// every time [`FakeClock::advance`] moves `now` forward past the
/// requested deadline. This lets tests simulate the exact retry/backoff
/// timelines described in the messaging spec (e.g. "t0+2s", "t0+6s")
/// without real wall-clock delays.
pub struct FakeClock {
    state: Mutex<FakeClockState>,
    notify: Notify,
}

impl FakeClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeClockState { now: start }),
            notify: Notify::new(),
        })
    }

    pub fn advance(&self, by: chrono::Duration) {
        {
            let mut state = self.state.lock();
            state.now = state.now + by;
        }
        self.notify.notify_waiters();
    }

    pub fn set(&self, to: DateTime<Utc>) {
        {
            let mut state = self.state.lock();
            state.now = to;
        }
        self.notify.notify_waiters();
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().now
    }

    fn delay<'a>(
        &'a self,
        duration: StdDuration,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        let deadline = self.now() + chrono::Duration::from_std(duration).unwrap_or_default();
        Box::pin(async move {
            loop {
                if self.now() >= deadline {
                    return;
                }
                self.notify.notified().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_clock_delay_resolves_on_advance() {
        let clock = FakeClock::new(Utc::now());
        let clock2 = clock.clone();
        let handle = tokio::spawn(async move {
            clock2.delay(StdDuration::from_secs(5)).await;
        });

        tokio::task::yield_now().await;
        clock.advance(chrono::Duration::seconds(5));
        handle.await.unwrap();
    }

    #[test]
    fn fake_clock_now_reflects_advance() {
        let start = Utc::now();
        let clock = FakeClock::new(start);
        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(clock.now(), start + chrono::Duration::seconds(10));
    }
}
