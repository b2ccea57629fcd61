//! TOML configuration with environment variable overrides, one struct per
//! processing component, loaded once at process start and handed to the
//! façade builder.

mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// Root configuration for a messaging process.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub command_processor: CommandProcessorConfig,
    pub query_processor: QueryProcessorConfig,
    pub event_bus: EventBusConfig,
    pub queue: QueueConfig,
    pub outbox: OutboxConfig,
    pub inbox: InboxConfig,
    pub saga: SagaConfig,
    pub pipeline: PipelineConfig,
    pub metrics: MetricsConfig,

    /// Directory backing file-based stores (sqlite databases) when the
    /// process is wired with durable rather than in-memory storage.
    pub data_dir: String,

    /// Enables verbose decorator logging and relaxed defaults for local runs.
    pub dev_mode: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            command_processor: CommandProcessorConfig::default(),
            query_processor: QueryProcessorConfig::default(),
            event_bus: EventBusConfig::default(),
            queue: QueueConfig::default(),
            outbox: OutboxConfig::default(),
            inbox: InboxConfig::default(),
            saga: SagaConfig::default(),
            pipeline: PipelineConfig::default(),
            metrics: MetricsConfig::default(),
            data_dir: "./data".to_string(),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandProcessorConfig {
    /// Size of the bounded admission queue; waiters beyond this back-pressure.
    pub max_waiters: usize,
}

impl Default for CommandProcessorConfig {
    fn default() -> Self {
        Self { max_waiters: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryProcessorConfig {
    pub max_waiters: usize,
}

impl Default for QueryProcessorConfig {
    fn default() -> Self {
        Self { max_waiters: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Capacity of the bounded fan-out dispatch region.
    pub dispatch_capacity: usize,
    /// Upper bound on in-flight handler invocations; defaults to the host's
    /// logical CPU count when zero.
    pub max_parallelism: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            dispatch_capacity: 1000,
            max_parallelism: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Default visibility timeout applied to a dequeued entry, in milliseconds.
    pub visibility_timeout_ms: u64,
    /// Attempts before an entry is moved to its queue's DLQ.
    pub max_dequeue_count: u32,
    /// Storage backend: "memory" or "sqlite".
    pub backend: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_ms: 30_000,
            max_dequeue_count: 5,
            backend: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Polling interval, in milliseconds.
    pub poll_interval_ms: u64,
    /// Entries fetched per poll.
    pub batch_size: usize,
    /// Default `MaxRetries` when an entry doesn't specify one.
    pub default_max_retries: u32,
    /// `Priority` threshold above which an entry bypasses the next poll.
    pub high_priority_threshold: i32,
    pub backend: String,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            batch_size: 100,
            default_max_retries: 3,
            high_priority_threshold: 5,
            backend: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InboxConfig {
    /// Default dedup window, in milliseconds, when an entry doesn't specify one.
    pub default_dedup_window_ms: u64,
    /// How long processed/failed entries are retained before cleanup purges them.
    pub retention_ms: u64,
    /// Cleanup sweep interval, in milliseconds.
    pub cleanup_interval_ms: u64,
    pub backend: String,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            default_dedup_window_ms: 86_400_000,
            retention_ms: 7 * 86_400_000,
            cleanup_interval_ms: 3_600_000,
            backend: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaConfig {
    /// How often the timeout monitor sweeps for stale instances, in milliseconds.
    pub timeout_sweep_interval_ms: u64,
    pub backend: String,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            timeout_sweep_interval_ms: 5_000,
            backend: "memory".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub rate_limiter: RateLimiterConfig,
    pub error_handling: ErrorHandlingConfig,
    pub correlation: CorrelationConfig,
    pub otel: OtelConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            rate_limiter: RateLimiterConfig::default(),
            error_handling: ErrorHandlingConfig::default(),
            correlation: CorrelationConfig::default(),
            otel: OtelConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub minimum_throughput: u32,
    pub break_duration_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            minimum_throughput: 10,
            break_duration_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    pub enabled: bool,
    pub permits_per_second: u32,
    pub burst: u32,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            permits_per_second: 1000,
            burst: 100,
        }
    }
}

/// Controls whether failed handlers are observed and dead-lettered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorHandlingConfig {
    pub enabled: bool,
}

impl Default for ErrorHandlingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Controls whether a correlation scope is pushed before each dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    pub enabled: bool,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Controls whether each dispatch is wrapped in a tracing span.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtelConfig {
    pub enabled: bool,
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub max_samples: usize,
    pub short_window_secs: u64,
    pub long_window_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            max_samples: 10_000,
            short_window_secs: 300,
            long_window_secs: 1800,
        }
    }
}

impl AppConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Loads defaults, then a discovered file, then environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        ConfigLoader::new().load()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_toml() {
        let config = AppConfig::default();
        let serialized = toml::to_string(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&serialized).unwrap();
        assert_eq!(parsed.outbox.batch_size, config.outbox.batch_size);
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let partial = "[outbox]\nbatch_size = 25\n";
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.outbox.batch_size, 25);
        assert_eq!(config.outbox.poll_interval_ms, 100);
        assert_eq!(config.queue.backend, "memory");
    }
}
