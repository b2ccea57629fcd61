//! Single composition root: wires one shared handler registry into the
//! command, query, event, queue, outbox, and inbox processing surfaces
//! so a caller (or the `mf-dev` binary) constructs one
//! [`MessagingFacade`] instead of assembling each processor by hand.

pub mod builder;
pub mod facade;
pub mod pipeline;

pub use builder::MessagingFacadeBuilder;
pub use facade::MessagingFacade;
pub use pipeline::{decorate_command, decorate_command_validated, decorate_event, decorate_query};
