//! External-system sending for outbox entries that carry a `destination`
//! rather than being dispatched locally through the handler registry.

use async_trait::async_trait;

use mf_core::MessagingError;

#[async_trait]
pub trait OutboxDestinationSender: Send + Sync {
    async fn send(&self, destination: &str, type_name: &str, payload: &serde_json::Value) -> Result<(), MessagingError>;
}

/// Posts the entry as a JSON body to `destination` (treated as a URL).
/// Grounded on the teacher's `reqwest`-based HTTP mediator
/// (`fc_router::mediator::HttpMediator`), trimmed to the single POST
/// call an outbox destination needs rather than a full retryable
/// mediator (the outbox's own retry/backoff loop already covers that).
///
/// Classifies the response the way `HttpMediator` does: 2xx is success;
/// 429 and 5xx are transient and handed back as [`MessagingError::Handler`]
/// so [`crate::dispatcher::OutboxDispatcher`] schedules a backoff retry;
/// any other 4xx is a permanent rejection, surfaced as
/// [`MessagingError::Business`] so the dispatcher fails the entry instead
/// of retrying a request that will never succeed.
pub struct HttpDestinationSender {
    client: reqwest::Client,
}

impl HttpDestinationSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpDestinationSender {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl OutboxDestinationSender for HttpDestinationSender {
    async fn send(&self, destination: &str, type_name: &str, payload: &serde_json::Value) -> Result<(), MessagingError> {
        let response = self
            .client
            .post(destination)
            .header("X-Message-Type", type_name)
            .json(payload)
            .send()
            .await
            .map_err(|e| MessagingError::Handler(anyhow::anyhow!(e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if status.as_u16() == 429 || status.is_server_error() {
            Err(MessagingError::Handler(anyhow::anyhow!("destination {destination} responded with {status}")))
        } else {
            Err(MessagingError::Business(format!("destination {destination} rejected the message with {status}")))
        }
    }
}
