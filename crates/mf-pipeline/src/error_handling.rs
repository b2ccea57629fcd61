//! Error-handling decorator: on a terminal failure (non-retryable, or
//! retries exhausted upstream), invokes an error handler and, for
//! failures eligible for dead-lettering, promotes the request to a
//! [`DeadLetterSink`] before converting the outcome into a structured
//! failure the caller can inspect via `Classification`.

use async_trait::async_trait;
use std::sync::Arc;

use mf_core::{Classification, MessagingError, ProcessingContext, Processor};

#[async_trait]
pub trait DeadLetterSink<Req: Send + Sync>: Send + Sync {
    async fn dead_letter(&self, request: Req, ctx: &ProcessingContext, error: &MessagingError);
}

#[async_trait]
pub trait ErrorObserver: Send + Sync {
    async fn on_error(&self, ctx: &ProcessingContext, error: &MessagingError);
}

pub struct ErrorHandlingDecorator<Req, Res> {
    inner: Arc<dyn Processor<Req, Res>>,
    dlq: Option<Arc<dyn DeadLetterSink<Req>>>,
    observer: Option<Arc<dyn ErrorObserver>>,
}

impl<Req, Res> ErrorHandlingDecorator<Req, Res> {
    pub fn new(inner: Arc<dyn Processor<Req, Res>>) -> Self {
        Self {
            inner,
            dlq: None,
            observer: None,
        }
    }

    pub fn with_dlq(mut self, dlq: Arc<dyn DeadLetterSink<Req>>) -> Self {
        self.dlq = Some(dlq);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ErrorObserver>) -> Self {
        self.observer = Some(observer);
        self
    }
}

#[async_trait]
impl<Req, Res> Processor<Req, Res> for ErrorHandlingDecorator<Req, Res>
where
    Req: Clone + Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    async fn process(&self, request: Req, ctx: &ProcessingContext) -> Result<Res, MessagingError> {
        match self.inner.process(request.clone(), ctx).await {
            Ok(res) => Ok(res),
            Err(err) => {
                if err.classify() == Classification::Cancelled {
                    return Err(err);
                }

                if let Some(observer) = &self.observer {
                    observer.on_error(ctx, &err).await;
                }

                let eligible_for_dlq = matches!(
                    err.classify(),
                    Classification::Transient | Classification::Business
                );
                if eligible_for_dlq {
                    if let Some(dlq) = &self.dlq {
                        dlq.dead_letter(request, ctx, &err).await;
                    }
                }

                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::{CancellationToken, Envelope, SystemClock};
    use parking_lot::Mutex;

    struct AlwaysFail;
    #[async_trait]
    impl Processor<String, ()> for AlwaysFail {
        async fn process(&self, _r: String, _c: &ProcessingContext) -> Result<(), MessagingError> {
            Err(MessagingError::Handler(anyhow::anyhow!("terminal")))
        }
    }

    struct RecordingSink {
        received: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeadLetterSink<String> for RecordingSink {
        async fn dead_letter(&self, request: String, _ctx: &ProcessingContext, _error: &MessagingError) {
            self.received.lock().push(request);
        }
    }

    fn ctx() -> ProcessingContext {
        ProcessingContext::new(Envelope::new(&SystemClock), CancellationToken::new())
    }

    #[tokio::test]
    async fn terminal_transient_failure_is_dead_lettered() {
        let sink = Arc::new(RecordingSink { received: Mutex::new(Vec::new()) });
        let decorator = ErrorHandlingDecorator::new(Arc::new(AlwaysFail)).with_dlq(sink.clone());

        let err = decorator.process("payload".to_string(), &ctx()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Handler(_)));
        assert_eq!(sink.received.lock().as_slice(), ["payload".to_string()]);
    }

    #[tokio::test]
    async fn cancellation_is_never_dead_lettered() {
        struct AlwaysCancel;
        #[async_trait]
        impl Processor<String, ()> for AlwaysCancel {
            async fn process(&self, _r: String, _c: &ProcessingContext) -> Result<(), MessagingError> {
                Err(MessagingError::Cancelled)
            }
        }
        let sink = Arc::new(RecordingSink { received: Mutex::new(Vec::new()) });
        let decorator = ErrorHandlingDecorator::new(Arc::new(AlwaysCancel)).with_dlq(sink.clone());
        let _ = decorator.process("x".to_string(), &ctx()).await;
        assert!(sink.received.lock().is_empty());
    }
}
