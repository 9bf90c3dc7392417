//! Durable-engine backend
//!
//! Adapts the workflow surface to an external engine that persists history
//! and replays workflow code after failures. The engine itself is reached
//! through [`DurableEngineClient`] and [`EngineWorkflowContext`]; this module
//! only bridges the two worlds and never re-implements an engine protocol.

mod client;
mod context;
mod executor;
mod retry;

pub use client::{
    DurableEngineClient, EngineError, EngineWorkflow, EngineWorkflowContext,
    NativeActivityOptions, StartWorkflowRequest,
};
pub use executor::{
    client_handle, DurableExecutor, DurableHandle, DEFAULT_TASK_QUEUE, DEFAULT_WORKFLOW_TIMEOUT,
};
pub use retry::{to_native_retry_policy, NativeRetryPolicy};
