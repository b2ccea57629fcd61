//! Declarative state machine DSL: `StateMachineBuilder::new().initially(..).during(state, During::new().when::<Event>(When::new()....))`.
//!
//! Each `When<D, E>` binding carries an ordered list of [`Step`]s —
//! `then`, `if_then_else`, `transition_to`, `finalize`, `compensate` —
//! executed in declaration order by [`crate::orchestrator::SagaOrchestrator`].
//! Event dispatch is erased behind [`ErasedBinding`] so one
//! `StateMachine<D>` can hold bindings for many distinct event types.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use mf_core::MessagingError;

/// Compensations registered during one dispatch, run LIFO on failure.
pub struct CompensationContext<D> {
    stack: Vec<Box<dyn FnOnce(&mut D) + Send>>,
}

impl<D> CompensationContext<D> {
    pub fn new() -> Self {
        Self { stack: Vec::new() }
    }

    pub fn push(&mut self, action: Box<dyn FnOnce(&mut D) + Send>) {
        self.stack.push(action);
    }

    pub(crate) fn unwind(&mut self, data: &mut D) {
        while let Some(action) = self.stack.pop() {
            action(data);
        }
    }
}

impl<D> Default for CompensationContext<D> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct ExecutionOutcome {
    pub transition_to: Option<String>,
    pub finalize: bool,
}

type ThenAction<D, E> = Box<dyn Fn(&mut D, &E, &mut CompensationContext<D>) -> Result<(), MessagingError> + Send + Sync>;
type Predicate<D, E> = Box<dyn Fn(&D, &E) -> bool + Send + Sync>;
type CompensationFactory<D, E> = Box<dyn Fn(&D, &E) -> Box<dyn FnOnce(&mut D) + Send> + Send + Sync>;
pub type TimeoutHandler<D> = Box<dyn Fn(&mut D) -> Option<String> + Send + Sync>;

enum Step<D, E> {
    Then(ThenAction<D, E>),
    IfThenElse {
        predicate: Predicate<D, E>,
        then_steps: Vec<Step<D, E>>,
        else_steps: Vec<Step<D, E>>,
    },
    TransitionTo(String),
    Finalize,
    Compensate(CompensationFactory<D, E>),
}

fn run_steps<D, E>(
    steps: &[Step<D, E>],
    data: &mut D,
    event: &E,
    comp: &mut CompensationContext<D>,
    outcome: &mut ExecutionOutcome,
) -> Result<(), MessagingError> {
    for step in steps {
        match step {
            Step::Then(action) => action(data, event, comp)?,
            Step::IfThenElse { predicate, then_steps, else_steps } => {
                if predicate(data, event) {
                    run_steps(then_steps, data, event, comp, outcome)?;
                } else {
                    run_steps(else_steps, data, event, comp, outcome)?;
                }
            }
            Step::TransitionTo(state) => outcome.transition_to = Some(state.clone()),
            Step::Finalize => outcome.finalize = true,
            Step::Compensate(factory) => comp.push(factory(data, event)),
        }
    }
    Ok(())
}

/// Builds the ordered step list bound to one event type for one state.
pub struct When<D, E> {
    steps: Vec<Step<D, E>>,
}

impl<D, E> When<D, E> {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn then(mut self, action: impl Fn(&mut D, &E, &mut CompensationContext<D>) -> Result<(), MessagingError> + Send + Sync + 'static) -> Self {
        self.steps.push(Step::Then(Box::new(action)));
        self
    }

    pub fn if_then_else(
        mut self,
        predicate: impl Fn(&D, &E) -> bool + Send + Sync + 'static,
        then_branch: When<D, E>,
        else_branch: When<D, E>,
    ) -> Self {
        self.steps.push(Step::IfThenElse {
            predicate: Box::new(predicate),
            then_steps: then_branch.steps,
            else_steps: else_branch.steps,
        });
        self
    }

    pub fn transition_to(mut self, state: impl Into<String>) -> Self {
        self.steps.push(Step::TransitionTo(state.into()));
        self
    }

    pub fn finalize(mut self) -> Self {
        self.steps.push(Step::Finalize);
        self
    }

    pub fn compensate(mut self, factory: impl Fn(&D, &E) -> Box<dyn FnOnce(&mut D) + Send> + Send + Sync + 'static) -> Self {
        self.steps.push(Step::Compensate(Box::new(factory)));
        self
    }
}

impl<D, E> Default for When<D, E> {
    fn default() -> Self {
        Self::new()
    }
}

trait ErasedBinding<D>: Send + Sync {
    fn event_type_id(&self) -> TypeId;
    fn event_type_name(&self) -> &'static str;
    fn execute(&self, data: &mut D, event: &dyn Any, comp: &mut CompensationContext<D>) -> Result<ExecutionOutcome, MessagingError>;
}

struct Binding<D, E> {
    steps: Vec<Step<D, E>>,
}

impl<D: Send + Sync + 'static, E: Send + Sync + 'static> ErasedBinding<D> for Binding<D, E> {
    fn event_type_id(&self) -> TypeId {
        TypeId::of::<E>()
    }

    fn event_type_name(&self) -> &'static str {
        std::any::type_name::<E>()
    }

    fn execute(&self, data: &mut D, event: &dyn Any, comp: &mut CompensationContext<D>) -> Result<ExecutionOutcome, MessagingError> {
        let event = event
            .downcast_ref::<E>()
            .expect("event type checked against event_type_id before dispatch");
        let mut outcome = ExecutionOutcome::default();
        run_steps(&self.steps, data, event, comp, &mut outcome)?;
        Ok(outcome)
    }
}

/// Bindings and the per-state timeout handler configured for one state.
pub struct During<D> {
    bindings: Vec<Arc<dyn ErasedBinding<D>>>,
    timeout: Option<(StdDuration, TimeoutHandler<D>)>,
}

impl<D: Send + Sync + 'static> During<D> {
    pub fn new() -> Self {
        Self { bindings: Vec::new(), timeout: None }
    }

    pub fn when<E: Send + Sync + 'static>(mut self, when: When<D, E>) -> Self {
        self.bindings.push(Arc::new(Binding { steps: when.steps }));
        self
    }

    pub fn on_timeout(mut self, duration: StdDuration, handler: impl Fn(&mut D) -> Option<String> + Send + Sync + 'static) -> Self {
        self.timeout = Some((duration, Box::new(handler)));
        self
    }
}

impl<D: Send + Sync + 'static> Default for During<D> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct StateMachine<D> {
    pub(crate) initial_state: String,
    states: HashMap<String, Vec<Arc<dyn ErasedBinding<D>>>>,
    timeouts: HashMap<String, (StdDuration, TimeoutHandler<D>)>,
}

impl<D: Send + Sync + 'static> StateMachine<D> {
    pub(crate) fn accepts(&self, state: &str, type_id: TypeId) -> bool {
        self.states
            .get(state)
            .map(|bindings| bindings.iter().any(|b| b.event_type_id() == type_id))
            .unwrap_or(false)
    }

    pub(crate) fn binding_for(&self, state: &str, type_id: TypeId) -> Option<Arc<dyn ErasedBinding<D>>> {
        self.states.get(state).and_then(|bindings| bindings.iter().find(|b| b.event_type_id() == type_id).cloned())
    }

    pub(crate) fn execute(
        &self,
        state: &str,
        type_id: TypeId,
        data: &mut D,
        event: &dyn Any,
        comp: &mut CompensationContext<D>,
    ) -> Result<ExecutionOutcome, MessagingError> {
        let binding = self
            .binding_for(state, type_id)
            .ok_or_else(|| MessagingError::Configuration(format!("state {state} does not accept this event")))?;
        binding.execute(data, event, comp)
    }

    pub(crate) fn timeout_for(&self, state: &str) -> Option<&(StdDuration, TimeoutHandler<D>)> {
        self.timeouts.get(state)
    }

    pub(crate) fn accepted_event_names(&self, state: &str) -> Vec<&'static str> {
        self.states.get(state).map(|b| b.iter().map(|e| e.event_type_name()).collect()).unwrap_or_default()
    }
}

pub struct StateMachineBuilder<D> {
    initial_state: Option<String>,
    states: HashMap<String, Vec<Arc<dyn ErasedBinding<D>>>>,
    timeouts: HashMap<String, (StdDuration, TimeoutHandler<D>)>,
}

impl<D: Send + Sync + 'static> StateMachineBuilder<D> {
    pub fn new() -> Self {
        Self {
            initial_state: None,
            states: HashMap::new(),
            timeouts: HashMap::new(),
        }
    }

    pub fn initially(mut self, state: impl Into<String>) -> Self {
        self.initial_state = Some(state.into());
        self
    }

    pub fn during(mut self, state: impl Into<String>, during: During<D>) -> Self {
        let state = state.into();
        self.states.entry(state.clone()).or_default().extend(during.bindings);
        if let Some(timeout) = during.timeout {
            self.timeouts.insert(state, timeout);
        }
        self
    }

    pub fn build(self) -> StateMachine<D> {
        StateMachine {
            initial_state: self.initial_state.expect("state machine must declare an initial state via `initially`"),
            states: self.states,
            timeouts: self.timeouts,
        }
    }
}

impl<D: Send + Sync + 'static> Default for StateMachineBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}
