//! Saga Orchestrator: a declarative per-state-machine DSL
//! (`StateMachineBuilder`/`During`/`When`) plus an orchestrator that
//! loads or creates an instance by correlation, runs the bound steps,
//! compensates LIFO on failure, and persists with optimistic
//! concurrency.

pub mod definition;
pub mod instance;
pub mod orchestrator;
pub mod repository;
pub mod repository_sqlx;
pub mod timeout;

pub use definition::{CompensationContext, During, StateMachine, StateMachineBuilder, When};
pub use instance::SagaInstance;
pub use orchestrator::SagaOrchestrator;
pub use repository::{InMemorySagaRepository, SagaRepository};
pub use repository_sqlx::SqlxSagaRepository;
pub use timeout::SagaTimeoutMonitor;
