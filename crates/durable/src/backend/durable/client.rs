//! Contract a durable engine client implements
//!
//! Two halves: [`DurableEngineClient`] is used from outside workflows to
//! start and control runs; [`EngineWorkflowContext`] is what the engine hands
//! to workflow code on every (re)execution. Everything on the second half must
//! be replay-safe: on replay the engine answers from history instead of
//! repeating side effects.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde_json::Value;

use super::retry::NativeRetryPolicy;
use crate::activity::{Activity, ActivityError};
use crate::workflow::{SignalReceiver, WorkflowError, WorkflowStatus};

/// Errors reported by a durable engine
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("workflow not found: {0}")]
    NotFound(String),

    #[error("workflow already started: {0}")]
    AlreadyStarted(String),

    #[error("workflow canceled")]
    Canceled,

    #[error("workflow timed out")]
    TimedOut,

    /// An activity failed after the engine's retries
    #[error("activity {activity} failed after {attempts} attempt(s): {error}")]
    ActivityFailed {
        activity: String,
        attempts: u32,
        error: ActivityError,
    },

    /// The workflow function returned an error
    #[error("workflow failed: {0}")]
    WorkflowFailed(String),

    #[error("unknown query type: {0}")]
    UnknownQuery(String),

    /// Transport or server failure
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// Whether the error is the run's final outcome rather than a failure to
    /// reach the engine
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Canceled | Self::TimedOut | Self::ActivityFailed { .. } | Self::WorkflowFailed(_)
        )
    }

    /// Error as seen by workflow code
    pub fn into_workflow_error(self, execution_timeout: Duration) -> WorkflowError {
        match self {
            Self::Canceled => WorkflowError::Canceled,
            Self::TimedOut => WorkflowError::Timeout(execution_timeout),
            Self::ActivityFailed {
                activity,
                attempts,
                error,
            } => WorkflowError::Activity {
                activity,
                attempts,
                source: error,
            },
            Self::WorkflowFailed(message) => WorkflowError::Failed(message),
            other => WorkflowError::Backend(other.to_string()),
        }
    }

    /// Encode a workflow function's error for the engine
    pub fn from_workflow_error(error: WorkflowError) -> Self {
        match error {
            WorkflowError::Canceled => Self::Canceled,
            WorkflowError::Timeout(_) => Self::TimedOut,
            WorkflowError::Activity {
                activity,
                attempts,
                source,
            } => Self::ActivityFailed {
                activity,
                attempts,
                error: source,
            },
            other => Self::WorkflowFailed(other.to_string()),
        }
    }
}

/// Activity options in the engine's vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct NativeActivityOptions {
    pub task_queue: String,
    pub start_to_close_timeout: Duration,
    /// `None` lets the engine apply its default policy
    pub retry_policy: Option<NativeRetryPolicy>,
}

type EngineWorkflowBody = dyn Fn(Arc<dyn EngineWorkflowContext>, Value) -> BoxFuture<'static, Result<Value, WorkflowError>>
    + Send
    + Sync;

/// Workflow entry point registered with the engine
///
/// The engine calls [`run`](Self::run) for the first execution and again for
/// every replay, each time with a fresh context positioned at the start of
/// history.
#[derive(Clone)]
pub struct EngineWorkflow {
    name: Arc<str>,
    body: Arc<EngineWorkflowBody>,
}

impl EngineWorkflow {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(Arc<dyn EngineWorkflowContext>, Value) -> BoxFuture<'static, Result<Value, WorkflowError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            body: Arc::new(body),
        }
    }

    /// Workflow type name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(
        &self,
        ctx: Arc<dyn EngineWorkflowContext>,
        input: Value,
    ) -> BoxFuture<'static, Result<Value, WorkflowError>> {
        (self.body)(ctx, input)
    }
}

impl fmt::Debug for EngineWorkflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineWorkflow").field("name", &self.name).finish()
    }
}

/// Everything the engine needs to start a run
#[derive(Debug, Clone)]
pub struct StartWorkflowRequest {
    pub workflow_id: String,
    pub task_queue: String,
    pub execution_timeout: Duration,
    pub workflow: EngineWorkflow,
    pub input: Value,
}

/// Client-side operations of a durable engine
#[async_trait]
pub trait DurableEngineClient: Send + Sync + 'static {
    /// Start a run and return its run ID
    async fn start_workflow(&self, request: StartWorkflowRequest) -> Result<String, EngineError>;

    /// Current status; an empty `run_id` means the latest run
    async fn describe_workflow(
        &self,
        workflow_id: &str,
        run_id: &str,
    ) -> Result<WorkflowStatus, EngineError>;

    /// Wait for the run to close
    async fn await_result(&self, workflow_id: &str, run_id: &str) -> Result<Value, EngineError>;

    async fn signal_workflow(
        &self,
        workflow_id: &str,
        name: &str,
        payload: Value,
    ) -> Result<(), EngineError>;

    async fn cancel_workflow(&self, workflow_id: &str) -> Result<(), EngineError>;

    async fn query_workflow(&self, workflow_id: &str, query_type: &str) -> Result<Value, EngineError>;
}

/// Replay-safe primitives available to workflow code under the engine
#[async_trait]
pub trait EngineWorkflowContext: Send + Sync {
    fn workflow_id(&self) -> &str;

    fn run_id(&self) -> &str;

    /// Deterministic workflow time
    fn now(&self) -> DateTime<Utc>;

    /// Whether cancellation of the run has been requested
    fn is_canceled(&self) -> bool;

    /// Schedule an activity; on replay the recorded result is returned
    async fn execute_activity(
        &self,
        activity: &Activity,
        input: Value,
        options: NativeActivityOptions,
    ) -> Result<Value, EngineError>;

    /// Durable timer
    async fn timer(&self, duration: Duration) -> Result<(), EngineError>;

    /// Next payload on the named signal channel
    fn signal_channel(&self, name: &str) -> SignalReceiver;
}
