//! # Durable Workflow Orchestration
//!
//! One workflow surface (timers, signals, activity invocation, cancellation)
//! over interchangeable execution backends.
//!
//! ## Features
//!
//! - **Backend-neutral workflows**: a workflow is an async function over
//!   [`WorkflowContext`]; it runs unchanged in-process or on a durable engine
//! - **Automatic retries**: retry policies with exponential backoff and jitter,
//!   or the engine's native retries
//! - **Signals and queries**: deliver external messages to running workflows
//! - **Backend registry**: executors are created by name from a [`Config`]
//! - **State store**: workflow state records behind [`WorkflowStore`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     BackendRegistry                         │
//! │        (name -> factory(Config) -> Arc<dyn Executor>)       │
//! └─────────────────────────────────────────────────────────────┘
//!                │                               │
//!                ▼                               ▼
//! ┌─────────────────────────────┐ ┌─────────────────────────────┐
//! │      InMemoryExecutor       │ │       DurableExecutor       │
//! │ (tokio task per run, real   │ │ (DurableEngineClient; every │
//! │  timers, signal mailbox,    │ │  context call forwarded to  │
//! │  WorkflowStore transitions) │ │  EngineWorkflowContext)     │
//! └─────────────────────────────┘ └─────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//! use weft_durable::prelude::*;
//!
//! # tokio_test::block_on(async {
//! let charge = Activity::new("charge", |_ctx, input| async move {
//!     Ok(json!({ "charged": input["amount"] }))
//! });
//!
//! let workflow = WorkflowFn::new("checkout", move |ctx, input| {
//!     let charge = charge.clone();
//!     async move {
//!         let options = ActivityOptions::new().with_retry_policy(RetryPolicy::exponential());
//!         let receipt = ctx.execute_activity(&charge, input, options).await?;
//!         ctx.sleep(Duration::from_millis(1)).await?;
//!         Ok(receipt)
//!     }
//! });
//!
//! let executor = default_registry().new_executor("inmemory", Config::default()).unwrap();
//! let handle = executor
//!     .start(&CancellationToken::new(), workflow, json!({"amount": 42}), StartOptions::default())
//!     .await
//!     .unwrap();
//!
//! assert_eq!(handle.result().await.unwrap(), json!({"charged": 42}));
//! # });
//! ```

pub mod activity;
pub mod backend;
pub mod engine;
pub mod persistence;
pub mod reliability;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::activity::{Activity, ActivityContext, ActivityError, TypedActivity};
    pub use crate::backend::durable::{DurableEngineClient, DurableExecutor};
    pub use crate::backend::memory::{InMemoryExecutor, InMemoryExecutorConfig};
    pub use crate::engine::{
        default_registry, BackendRegistry, Config, Executor, ExecutorError, ExecutorHooks,
        RegistryError, WorkflowHandle,
    };
    pub use crate::persistence::{InMemoryWorkflowStore, StoreError, WorkflowStore};
    pub use crate::reliability::RetryPolicy;
    pub use crate::workflow::{
        ActivityOptions, Signal, StartOptions, WorkflowContext, WorkflowError, WorkflowFilter,
        WorkflowFn, WorkflowState, WorkflowStatus,
    };
}

// Re-export key types at crate root
pub use activity::{Activity, ActivityContext, ActivityError, TypedActivity};
pub use backend::durable::{
    to_native_retry_policy, DurableEngineClient, DurableExecutor, EngineWorkflowContext,
    NativeRetryPolicy,
};
pub use backend::memory::{InMemoryExecutor, InMemoryExecutorConfig};
pub use engine::{
    backend_from_env, default_registry, BackendRegistry, Config, Executor, ExecutorError,
    ExecutorHooks, RegistryError, WorkflowHandle,
};
pub use persistence::{InMemoryWorkflowStore, NoopWorkflowStore, StoreError, WorkflowStore};
pub use reliability::RetryPolicy;
pub use workflow::{
    ActivityOptions, CancellationFuture, Signal, SignalReceiver, StartOptions, WorkflowContext,
    WorkflowError, WorkflowFilter, WorkflowFn, WorkflowState, WorkflowStatus,
};
