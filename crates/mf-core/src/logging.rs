//! Structured logging init.
//!
//! Adapted from `fc_common::logging`: `LOG_FORMAT=json` selects a JSON
//! `tracing_subscriber::fmt` layer (for aggregation), anything else falls
//! back to human-readable text; `RUST_LOG` drives the `EnvFilter` as usual.
//!
//! ```rust,ignore
//! mf_core::logging::init_logging("mf-dev");
//! tracing::info!(correlation_id = %id, "dispatched command");
//! ```

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

/// Initializes the global `tracing` subscriber for `service_name`. Reads
/// `LOG_FORMAT` ("json" or anything else) and `RUST_LOG` (defaults to
/// "info") from the environment, then emits one startup line identifying
/// the service, so `service_name` shows up in the very first log record
/// rather than only being a doc-comment convention.
pub fn init_logging(service_name: &str) {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    let json = log_format.eq_ignore_ascii_case("json");
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        init_with_layer(env_filter, json_layer());
    } else {
        init_with_layer(env_filter, text_layer());
    }

    tracing::info!(service = service_name, format = if json { "json" } else { "text" }, "logging initialized");
}

fn init_with_layer<L>(env_filter: EnvFilter, layer: L)
where
    L: tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync + 'static,
{
    tracing_subscriber::registry().with(layer).with(env_filter).init();
}

fn json_layer() -> impl tracing_subscriber::Layer<tracing_subscriber::Registry> {
    fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(false)
        .with_target(true)
        .flatten_event(true)
        .with_span_events(FmtSpan::CLOSE)
}

fn text_layer() -> impl tracing_subscriber::Layer<tracing_subscriber::Registry> {
    fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_filter_falls_back_to_info() {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        drop(filter);
    }
}
