//! Command and Query processors: the two single-lane (serialized) message
//! surfaces of the façade. Both share the same acquire-semaphore /
//! check-cancellation / resolve-handler / invoke / release algorithm;
//! they are kept as separate types rather than one generic processor
//! because their handler traits and response contracts differ (`Command`
//! always answers, `Query` always answers with a cacheable result) and a
//! caller should never be able to accidentally register a query handler
//! on the command surface or vice versa.

pub mod command;
pub mod query;

pub use command::CommandProcessor;
pub use query::QueryProcessor;
