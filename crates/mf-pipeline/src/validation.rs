//! Validation decorator: short-circuits before the inner processor runs.

use async_trait::async_trait;
use std::sync::Arc;

use mf_core::{MessagingError, ProcessingContext, Processor};

/// Validates a request before it reaches the inner processor. Returning
/// `Err` aggregates the validation errors into
/// [`MessagingError::Validation`] and the inner processor is never called.
#[async_trait]
pub trait Validator<Req: Send + Sync>: Send + Sync {
    async fn validate(&self, request: &Req) -> Result<(), Vec<String>>;
}

pub struct ValidationDecorator<Req, Res> {
    validator: Arc<dyn Validator<Req>>,
    inner: Arc<dyn Processor<Req, Res>>,
}

impl<Req, Res> ValidationDecorator<Req, Res> {
    pub fn new(validator: Arc<dyn Validator<Req>>, inner: Arc<dyn Processor<Req, Res>>) -> Self {
        Self { validator, inner }
    }
}

#[async_trait]
impl<Req, Res> Processor<Req, Res> for ValidationDecorator<Req, Res>
where
    Req: Send + Sync + 'static,
    Res: Send + Sync + 'static,
{
    async fn process(&self, request: Req, ctx: &ProcessingContext) -> Result<Res, MessagingError> {
        if let Err(errors) = self.validator.validate(&request).await {
            return Err(MessagingError::Validation(errors));
        }
        self.inner.process(request, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mf_core::CancellationToken;

    struct EvenOnly;
    #[async_trait]
    impl Validator<i32> for EvenOnly {
        async fn validate(&self, request: &i32) -> Result<(), Vec<String>> {
            if request % 2 == 0 {
                Ok(())
            } else {
                Err(vec!["must be even".to_string()])
            }
        }
    }

    struct Double;
    #[async_trait]
    impl Processor<i32, i32> for Double {
        async fn process(&self, request: i32, _ctx: &ProcessingContext) -> Result<i32, MessagingError> {
            Ok(request * 2)
        }
    }

    fn ctx() -> ProcessingContext {
        ProcessingContext::new(mf_core::Envelope::new(&mf_core::SystemClock), CancellationToken::new())
    }

    #[tokio::test]
    async fn valid_request_reaches_inner_processor() {
        let decorator = ValidationDecorator::new(Arc::new(EvenOnly), Arc::new(Double));
        assert_eq!(decorator.process(4, &ctx()).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn invalid_request_short_circuits() {
        let decorator = ValidationDecorator::new(Arc::new(EvenOnly), Arc::new(Double));
        let err = decorator.process(3, &ctx()).await.unwrap_err();
        assert!(matches!(err, MessagingError::Validation(_)));
    }
}
