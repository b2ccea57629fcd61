//! Sliding-window metrics collection.
//!
//! Adapted from `fc_router::metrics::PoolMetricsCollector`: atomic
//! all-time counters plus a `VecDeque` of timestamped samples trimmed to a
//! long window, from which a snapshot with percentiles and two rolling
//! windows (5 minutes / 30 minutes) is computed on demand. `get_snapshot`
//! never hands back a live view — callers get a point-in-time copy.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;

#[derive(Debug, Clone)]
struct Sample {
    timestamp: Instant,
    duration_ms: u64,
    success: bool,
}

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub max_samples: usize,
    pub short_window: Duration,
    pub long_window: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_samples: 10_000,
            short_window: Duration::from_secs(300),
            long_window: Duration::from_secs(1800),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessingTimeStats {
    pub avg_ms: f64,
    pub min_ms: u64,
    pub max_ms: u64,
    pub p50_ms: u64,
    pub p95_ms: u64,
    pub p99_ms: u64,
    pub sample_count: u64,
}

#[derive(Debug, Clone, Default)]
pub struct WindowStats {
    pub success_count: u64,
    pub failure_count: u64,
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub total_success: u64,
    pub total_failure: u64,
    pub total_rate_limited: u64,
    pub success_rate: f64,
    pub processing_time: ProcessingTimeStats,
    pub last_5_min: WindowStats,
    pub last_30_min: WindowStats,
}

/// Thread-safe metrics collector, one per processor instance (command
/// processor, query processor, event bus, a queue, the outbox dispatcher).
pub struct MetricsCollector {
    config: MetricsConfig,
    total_success: AtomicU64,
    total_failure: AtomicU64,
    total_rate_limited: AtomicU64,
    samples: RwLock<VecDeque<Sample>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            config,
            total_success: AtomicU64::new(0),
            total_failure: AtomicU64::new(0),
            total_rate_limited: AtomicU64::new(0),
            samples: RwLock::new(VecDeque::new()),
        }
    }

    pub fn record_success(&self, duration_ms: u64) {
        self.total_success.fetch_add(1, Ordering::Relaxed);
        self.add_sample(duration_ms, true);
    }

    pub fn record_failure(&self, duration_ms: u64) {
        self.total_failure.fetch_add(1, Ordering::Relaxed);
        self.add_sample(duration_ms, false);
    }

    pub fn record_rate_limited(&self) {
        self.total_rate_limited.fetch_add(1, Ordering::Relaxed);
    }

    fn add_sample(&self, duration_ms: u64, success: bool) {
        let mut samples = self.samples.write();
        let cutoff = Instant::now() - self.config.long_window;
        while samples.front().map(|s| s.timestamp < cutoff).unwrap_or(false) {
            samples.pop_front();
        }
        samples.push_back(Sample {
            timestamp: Instant::now(),
            duration_ms,
            success,
        });
        while samples.len() > self.config.max_samples {
            samples.pop_front();
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.samples.read();
        let now = Instant::now();

        let total_success = self.total_success.load(Ordering::Relaxed);
        let total_failure = self.total_failure.load(Ordering::Relaxed);
        let total_rate_limited = self.total_rate_limited.load(Ordering::Relaxed);
        let total = total_success + total_failure;
        let success_rate = if total > 0 {
            total_success as f64 / total as f64
        } else {
            1.0
        };

        let durations: Vec<u64> = samples.iter().map(|s| s.duration_ms).collect();
        let processing_time = Self::processing_time_stats(&durations);

        let short_cutoff = now - self.config.short_window;
        let long_cutoff = now - self.config.long_window;
        let last_5_min = Self::window_stats(samples.iter().filter(|s| s.timestamp >= short_cutoff));
        let last_30_min = Self::window_stats(samples.iter().filter(|s| s.timestamp >= long_cutoff));

        MetricsSnapshot {
            total_success,
            total_failure,
            total_rate_limited,
            success_rate,
            processing_time,
            last_5_min,
            last_30_min,
        }
    }

    fn processing_time_stats(durations: &[u64]) -> ProcessingTimeStats {
        if durations.is_empty() {
            return ProcessingTimeStats::default();
        }
        let mut sorted = durations.to_vec();
        sorted.sort_unstable();
        let count = sorted.len() as u64;
        let sum: u64 = sorted.iter().sum();
        ProcessingTimeStats {
            avg_ms: sum as f64 / count as f64,
            min_ms: sorted[0],
            max_ms: sorted[sorted.len() - 1],
            p50_ms: Self::percentile(&sorted, 50.0),
            p95_ms: Self::percentile(&sorted, 95.0),
            p99_ms: Self::percentile(&sorted, 99.0),
            sample_count: count,
        }
    }

    fn percentile(sorted: &[u64], pct: f64) -> u64 {
        if sorted.is_empty() {
            return 0;
        }
        let rank = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
        sorted[rank.min(sorted.len() - 1)]
    }

    fn window_stats<'a>(samples: impl Iterator<Item = &'a Sample>) -> WindowStats {
        let mut stats = WindowStats::default();
        for s in samples {
            if s.success {
                stats.success_count += 1;
            } else {
                stats.failure_count += 1;
            }
        }
        stats
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_success_and_failure_totals() {
        let collector = MetricsCollector::new();
        collector.record_success(10);
        collector.record_success(20);
        collector.record_failure(5);

        let snap = collector.snapshot();
        assert_eq!(snap.total_success, 2);
        assert_eq!(snap.total_failure, 1);
        assert!((snap.success_rate - (2.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn empty_collector_reports_full_success_rate() {
        let collector = MetricsCollector::new();
        assert_eq!(collector.snapshot().success_rate, 1.0);
    }

    #[test]
    fn percentiles_cover_recorded_samples() {
        let collector = MetricsCollector::new();
        for ms in [10, 20, 30, 40, 50] {
            collector.record_success(ms);
        }
        let snap = collector.snapshot();
        assert_eq!(snap.processing_time.sample_count, 5);
        assert_eq!(snap.processing_time.min_ms, 10);
        assert_eq!(snap.processing_time.max_ms, 50);
    }
}
