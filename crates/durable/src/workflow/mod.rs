//! Workflow abstractions and types
//!
//! This module contains the backend-neutral workflow primitives:
//! - [`WorkflowFn`] the orchestrating function and [`WorkflowError`]
//! - [`WorkflowContext`] the surface workflow code runs against
//! - [`WorkflowState`] / [`WorkflowStatus`] / [`WorkflowFilter`] for persistence
//! - [`Signal`] for external communication
//! - [`ActivityOptions`] / [`StartOptions`]

mod context;
mod definition;
mod options;
mod signal;
mod state;

pub use context::{CancellationFuture, SignalReceiver, WorkflowContext};
pub use definition::{WorkflowError, WorkflowFn};
pub use options::{ActivityOptions, StartOptions};
pub use signal::Signal;
pub use state::{WorkflowFilter, WorkflowState, WorkflowStatus};
