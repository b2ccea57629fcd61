//! Structured entry/exit logging decorator.

use async_trait::async_trait;
use std::sync::Arc;

use mf_core::{MessagingError, ProcessingContext, Processor};

pub struct LoggingDecorator<Req, Res> {
    name: String,
    include_payload: bool,
    inner: Arc<dyn Processor<Req, Res>>,
}

impl<Req, Res> LoggingDecorator<Req, Res> {
    pub fn new(name: impl Into<String>, include_payload: bool, inner: Arc<dyn Processor<Req, Res>>) -> Self {
        Self {
            name: name.into(),
            include_payload,
            inner,
        }
    }
}

#[async_trait]
impl<Req, Res> Processor<Req, Res> for LoggingDecorator<Req, Res>
where
    Req: std::fmt::Debug + Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    async fn process(&self, request: Req, ctx: &ProcessingContext) -> Result<Res, MessagingError> {
        if self.include_payload {
            tracing::info!(processor = %self.name, message_id = %ctx.envelope.id, attempt = ctx.attempt, payload = ?request, "processing started");
        } else {
            tracing::info!(processor = %self.name, message_id = %ctx.envelope.id, attempt = ctx.attempt, "processing started");
        }

        let result = self.inner.process(request, ctx).await;

        match &result {
            Ok(_) => tracing::info!(processor = %self.name, message_id = %ctx.envelope.id, "processing completed"),
            Err(err) => tracing::warn!(processor = %self.name, message_id = %ctx.envelope.id, error = %err, "processing failed"),
        }

        result
    }
}
