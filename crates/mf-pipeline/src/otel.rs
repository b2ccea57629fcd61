//! OpenTelemetry-style tracing decorator: creates a `tracing` span per
//! invocation carrying trace/span/parent linkage derived from correlation
//! IDs, following the span-per-request shape `fc_common::logging`
//! documents (`info_span!` with `correlation_id`/`request_id` fields) —
//! this crate has no OTel exporter wired in, so the span is the
//! observability surface rather than a forwarded `opentelemetry::Context`.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::Instrument;

use mf_core::{MessagingError, ProcessingContext, Processor};

pub struct TracingDecorator<Req, Res> {
    operation: String,
    inner: Arc<dyn Processor<Req, Res>>,
}

impl<Req, Res> TracingDecorator<Req, Res> {
    pub fn new(operation: impl Into<String>, inner: Arc<dyn Processor<Req, Res>>) -> Self {
        Self {
            operation: operation.into(),
            inner,
        }
    }
}

#[async_trait]
impl<Req, Res> Processor<Req, Res> for TracingDecorator<Req, Res>
where
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    async fn process(&self, request: Req, ctx: &ProcessingContext) -> Result<Res, MessagingError> {
        let span = tracing::info_span!(
            "mf.process",
            operation = %self.operation,
            trace_id = %ctx.envelope.correlation_id.map(|c| c.to_string()).unwrap_or_default(),
            span_id = %ctx.envelope.id,
            parent_span_id = %ctx.envelope.causation_id.map(|c| c.to_string()).unwrap_or_default(),
        );
        self.inner.process(request, ctx).instrument(span).await
    }
}
