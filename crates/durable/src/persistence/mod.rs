//! Persistence layer for workflow state
//!
//! This module provides:
//! - [`WorkflowStore`] trait for workflow state records
//! - [`InMemoryWorkflowStore`] for in-process execution and tests
//! - [`NoopWorkflowStore`] for backends whose engine owns the state

mod memory;
mod noop;
mod store;

pub use memory::InMemoryWorkflowStore;
pub use noop::NoopWorkflowStore;
pub use store::{StoreError, WorkflowStore};
