//! File discovery and environment variable overrides.
//!
//! Adapted from `fc-config::ConfigLoader`: an explicit path wins, then
//! `MF_CONFIG`, then a fixed search list, then compiled-in defaults; after
//! the file is loaded, `MF_*` environment variables override individual
//! fields.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "mf.toml",
    "./config/config.toml",
    "/etc/mf/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("MF_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.exists())
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("MF_QUEUE_BACKEND") {
            config.queue.backend = val;
        }
        if let Ok(val) = env::var("MF_QUEUE_VISIBILITY_TIMEOUT_MS") {
            if let Ok(ms) = val.parse() {
                config.queue.visibility_timeout_ms = ms;
            }
        }
        if let Ok(val) = env::var("MF_OUTBOX_POLL_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                config.outbox.poll_interval_ms = ms;
            }
        }
        if let Ok(val) = env::var("MF_OUTBOX_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.outbox.batch_size = size;
            }
        }
        if let Ok(val) = env::var("MF_OUTBOX_BACKEND") {
            config.outbox.backend = val;
        }
        if let Ok(val) = env::var("MF_INBOX_BACKEND") {
            config.inbox.backend = val;
        }
        if let Ok(val) = env::var("MF_INBOX_DEDUP_WINDOW_MS") {
            if let Ok(ms) = val.parse() {
                config.inbox.default_dedup_window_ms = ms;
            }
        }
        if let Ok(val) = env::var("MF_SAGA_BACKEND") {
            config.saga.backend = val;
        }
        if let Ok(val) = env::var("MF_PIPELINE_RETRY_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                config.pipeline.retry.max_attempts = attempts;
            }
        }
        if let Ok(val) = env::var("MF_PIPELINE_CIRCUIT_BREAKER_ENABLED") {
            config.pipeline.circuit_breaker.enabled = val.parse().unwrap_or(true);
        }
        if let Ok(val) = env::var("MF_PIPELINE_RATE_LIMITER_ENABLED") {
            config.pipeline.rate_limiter.enabled = val.parse().unwrap_or(false);
        }
        if let Ok(val) = env::var("MF_DATA_DIR") {
            config.data_dir = val;
        }
        if let Ok(val) = env::var("MF_DEV_MODE") {
            config.dev_mode = val.parse().unwrap_or(false);
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn explicit_path_takes_precedence_over_search_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[outbox]\nbatch_size = 7\n").unwrap();

        let loader = ConfigLoader::with_path(&path);
        let config = loader.load().unwrap();
        assert_eq!(config.outbox.batch_size, 7);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let loader = ConfigLoader::with_path("/nonexistent/path/to/config.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.outbox.batch_size, AppConfig::default().outbox.batch_size);
    }
}
