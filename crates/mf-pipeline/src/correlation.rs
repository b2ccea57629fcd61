//! Correlation decorator: pushes an ambient scope derived from the
//! incoming envelope before invoking the inner processor, torn down
//! unconditionally (via [`mf_core::correlation::ScopeGuard`]'s `Drop`) on
//! exit — success, failure, or panic unwind alike.

use async_trait::async_trait;
use std::sync::Arc;

use mf_core::{CorrelationContext, MessagingError, ProcessingContext, Processor};

pub struct CorrelationDecorator<Req, Res> {
    inner: Arc<dyn Processor<Req, Res>>,
}

impl<Req, Res> CorrelationDecorator<Req, Res> {
    pub fn new(inner: Arc<dyn Processor<Req, Res>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<Req, Res> Processor<Req, Res> for CorrelationDecorator<Req, Res>
where
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    async fn process(&self, request: Req, ctx: &ProcessingContext) -> Result<Res, MessagingError> {
        let _scope = CorrelationContext::begin_scope(ctx.envelope.correlation_id, ctx.envelope.id);
        self.inner.process(request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::{with_root_scope, CancellationToken, CorrelationId, Envelope, SystemClock};

    struct ObservesAmbient;
    #[async_trait]
    impl Processor<(), Option<mf_core::CorrelationFrame>> for ObservesAmbient {
        async fn process(&self, _r: (), _c: &ProcessingContext) -> Result<Option<mf_core::CorrelationFrame>, MessagingError> {
            Ok(CorrelationContext::current())
        }
    }

    #[tokio::test]
    async fn inner_processor_observes_pushed_scope() {
        with_root_scope(async {
            let mut envelope = Envelope::new(&SystemClock);
            envelope.correlation_id = Some(CorrelationId::new());
            let ctx = ProcessingContext::new(envelope.clone(), CancellationToken::new());

            let decorator = CorrelationDecorator::new(Arc::new(ObservesAmbient));
            let frame = decorator.process((), &ctx).await.unwrap().expect("scope active");
            assert_eq!(frame.correlation_id, envelope.correlation_id);
            assert_eq!(frame.message_id, envelope.id);

            assert!(CorrelationContext::current().is_none());
        })
        .await;
    }
}
