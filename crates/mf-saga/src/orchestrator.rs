//! `DispatchAsync`: load-or-create the instance for an event's
//! correlation, run its current state's binding for the event's type,
//! compensate LIFO on failure, then persist with optimistic
//! concurrency.

use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use mf_core::{Clock, Message, MessagingError, SystemClock};

use crate::definition::{CompensationContext, StateMachine};
use crate::instance::SagaInstance;
use crate::repository::SagaRepository;

pub struct SagaOrchestrator<D> {
    machine: Arc<StateMachine<D>>,
    repository: Arc<dyn SagaRepository>,
    clock: Arc<dyn Clock>,
    ignore_unhandled_events: bool,
    _data: PhantomData<fn() -> D>,
}

impl<D> SagaOrchestrator<D>
where
    D: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    pub fn new(machine: StateMachine<D>, repository: Arc<dyn SagaRepository>) -> Self {
        Self {
            machine: Arc::new(machine),
            repository,
            clock: Arc::new(SystemClock),
            ignore_unhandled_events: false,
            _data: PhantomData,
        }
    }

    /// When set, an event arriving for a state that does not accept it
    /// is dropped with a debug log rather than surfaced as an error.
    pub fn ignore_unhandled_events(mut self, ignore: bool) -> Self {
        self.ignore_unhandled_events = ignore;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub async fn dispatch<E: Send + Sync + 'static>(&self, message: Message<E>) -> Result<(), MessagingError> {
        let correlation_id = message
            .envelope
            .correlation_id
            .ok_or_else(|| MessagingError::Configuration("saga dispatch requires a correlation id".to_string()))?;
        let now = self.clock.now();
        let type_id = TypeId::of::<E>();

        let loaded = self.repository.find(correlation_id).await?;
        let is_new = loaded.is_none();

        let (mut instance, mut data): (SagaInstance, D) = match loaded {
            Some(instance) => {
                let data: D =
                    serde_json::from_value(instance.data.clone()).map_err(|e| MessagingError::Configuration(e.to_string()))?;
                (instance, data)
            }
            None => {
                if !self.machine.accepts(&self.machine.initial_state, type_id) {
                    return Err(MessagingError::Configuration(format!(
                        "no saga instance for correlation {correlation_id} and {} does not start one",
                        std::any::type_name::<E>()
                    )));
                }
                (
                    SagaInstance::new(correlation_id, self.machine.initial_state.clone(), serde_json::Value::Null, now),
                    D::default(),
                )
            }
        };

        if !self.machine.accepts(&instance.current_state, type_id) {
            if self.ignore_unhandled_events {
                tracing::debug!(
                    state = %instance.current_state,
                    event = std::any::type_name::<E>(),
                    accepted = ?self.machine.accepted_event_names(&instance.current_state),
                    "saga state does not accept this event, ignoring"
                );
                return Ok(());
            }
            return Err(MessagingError::Configuration(format!(
                "saga state {} does not accept {}",
                instance.current_state,
                std::any::type_name::<E>()
            )));
        }

        let mut comp = CompensationContext::new();
        let execution = self.machine.execute(&instance.current_state, type_id, &mut data, &message.payload, &mut comp);

        match execution {
            Ok(outcome) => {
                if let Some(target) = outcome.transition_to {
                    instance.current_state = target;
                }
                if outcome.finalize {
                    instance.is_completed = true;
                }
            }
            Err(err) => {
                tracing::warn!(correlation = %correlation_id, error = %err, "saga action failed, compensating");
                comp.unwind(&mut data);
                instance.is_failed = true;
                instance.failure_reason = Some(err.to_string());
            }
        }

        instance.data = serde_json::to_value(&data).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        instance.updated_at = now;

        if is_new {
            self.repository.save(instance).await
        } else {
            self.repository.update(instance).await
        }
    }

    /// Runs the `OnTimeout` handler (if any) registered for `instance`'s
    /// current state, persisting the result. Called by the timeout
    /// monitor for stale instances.
    pub async fn handle_timeout(&self, mut instance: SagaInstance) -> Result<(), MessagingError> {
        let Some((_, handler)) = self.machine.timeout_for(&instance.current_state) else {
            return Ok(());
        };

        let mut data: D = serde_json::from_value(instance.data.clone()).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        if let Some(target) = handler(&mut data) {
            instance.current_state = target;
        }
        instance.data = serde_json::to_value(&data).map_err(|e| MessagingError::Configuration(e.to_string()))?;
        instance.updated_at = self.clock.now();

        self.repository.update(instance).await
    }

    pub fn machine(&self) -> &Arc<StateMachine<D>> {
        &self.machine
    }

    pub fn repository(&self) -> &Arc<dyn SagaRepository> {
        &self.repository
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{During, StateMachineBuilder, When};
    use crate::repository::InMemorySagaRepository;
    use mf_core::{CorrelationId, SystemClock as Clk};
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct OrderData {
        paid_amount: u32,
        refunded: bool,
    }

    #[derive(Debug)]
    struct OrderPlaced {
        amount: u32,
    }
    #[derive(Debug)]
    struct PaymentFailed;
    #[derive(Debug)]
    struct OrderShipped;

    fn machine() -> StateMachine<OrderData> {
        StateMachineBuilder::new()
            .initially("AwaitingPayment")
            .during(
                "AwaitingPayment",
                During::new()
                    .when::<OrderPlaced>(
                        When::new()
                            .then(|data: &mut OrderData, event: &OrderPlaced, _comp| {
                                data.paid_amount = event.amount;
                                Ok(())
                            })
                            .transition_to("Paid"),
                    )
                    .when::<PaymentFailed>(When::new().then(|_, _, _| {
                        Err(MessagingError::Handler(anyhow::anyhow!("payment declined")))
                    })),
            )
            .during(
                "Paid",
                During::new().when::<OrderShipped>(
                    When::new()
                        .compensate(|data: &OrderData, _event| {
                            let amount = data.paid_amount;
                            Box::new(move |d: &mut OrderData| {
                                d.refunded = true;
                                let _ = amount;
                            })
                        })
                        .then(|_, _, _| Err(MessagingError::Handler(anyhow::anyhow!("warehouse out of stock"))))
                        .finalize(),
                ),
            )
            .build()
    }

    #[tokio::test]
    async fn first_event_creates_instance_and_transitions() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let orchestrator = SagaOrchestrator::new(machine(), repo.clone());
        let correlation_id = CorrelationId::new();

        let mut message = Message::new(OrderPlaced { amount: 500 }, &Clk);
        message.envelope.correlation_id = Some(correlation_id);
        orchestrator.dispatch(message).await.unwrap();

        let instance = repo.find(correlation_id).await.unwrap().unwrap();
        assert_eq!(instance.current_state, "Paid");
        assert_eq!(instance.version, 0);
        assert!(!instance.is_failed);
    }

    #[tokio::test]
    async fn failure_runs_compensation_and_marks_failed() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let orchestrator = SagaOrchestrator::new(machine(), repo.clone());
        let correlation_id = CorrelationId::new();

        let mut placed = Message::new(OrderPlaced { amount: 250 }, &Clk);
        placed.envelope.correlation_id = Some(correlation_id);
        orchestrator.dispatch(placed).await.unwrap();

        let mut shipped = Message::new(OrderShipped, &Clk);
        shipped.envelope.correlation_id = Some(correlation_id);
        orchestrator.dispatch(shipped).await.unwrap();

        let instance = repo.find(correlation_id).await.unwrap().unwrap();
        assert!(instance.is_failed);
        assert_eq!(instance.failure_reason.as_deref(), Some("handler failed: warehouse out of stock"));
        let data: OrderData = serde_json::from_value(instance.data).unwrap();
        assert!(data.refunded);
    }

    #[tokio::test]
    async fn with_clock_overrides_the_timestamp_persisted_on_the_instance() {
        let fake_clock = mf_core::FakeClock::new(chrono::Utc::now());
        let repo = Arc::new(InMemorySagaRepository::new());
        let orchestrator = SagaOrchestrator::new(machine(), repo.clone()).with_clock(fake_clock.clone());
        let correlation_id = CorrelationId::new();

        fake_clock.advance(chrono::Duration::hours(3));
        let mut placed = Message::new(OrderPlaced { amount: 500 }, &Clk);
        placed.envelope.correlation_id = Some(correlation_id);
        orchestrator.dispatch(placed).await.unwrap();

        let instance = repo.find(correlation_id).await.unwrap().unwrap();
        assert_eq!(instance.updated_at, fake_clock.now());
    }

    #[tokio::test]
    async fn event_not_accepted_by_current_state_is_an_error() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let orchestrator = SagaOrchestrator::new(machine(), repo.clone());
        let correlation_id = CorrelationId::new();

        let mut shipped = Message::new(OrderShipped, &Clk);
        shipped.envelope.correlation_id = Some(correlation_id);
        let err = orchestrator.dispatch(shipped).await.unwrap_err();
        assert_eq!(err.classify(), mf_core::Classification::Configuration);
    }
}
