//! Executor and handle contracts shared by every backend

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::workflow::{Signal, StartOptions, WorkflowError, WorkflowFn, WorkflowStatus};

/// Query type answered by every executor with the run's current status
pub const STATUS_QUERY: &str = "status";

/// Errors from executor operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutorError {
    /// No run with this workflow ID is known to the executor
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// The run has already reached a terminal status
    #[error("workflow is not running: {0}")]
    NotRunning(String),

    /// A non-terminal run with this workflow ID already exists
    #[error("workflow already running: {0}")]
    AlreadyRunning(String),

    /// The executor does not answer this query type
    #[error("unknown query type: {0}")]
    UnknownQuery(String),

    /// Options or configuration were rejected before anything started
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The backend failed to carry out the request
    #[error("backend error: {0}")]
    Backend(String),
}

/// Reference to one started workflow run
#[async_trait]
pub trait WorkflowHandle: Send + Sync + std::fmt::Debug {
    /// Workflow ID
    fn id(&self) -> &str;

    /// ID of this particular execution
    fn run_id(&self) -> &str;

    /// Current status as known to the backend
    async fn status(&self) -> Result<WorkflowStatus, ExecutorError>;

    /// Wait for a terminal status and return the run's outcome
    ///
    /// Calling this again after completion returns the same outcome.
    async fn result(&self) -> Result<Value, WorkflowError>;
}

/// Starts and controls workflow runs on one backend
///
/// # Example
///
/// ```ignore
/// let executor = default_registry().new_executor("inmemory", Config::default())?;
/// let handle = executor
///     .start(&CancellationToken::new(), workflow, json!("input"), StartOptions::default())
///     .await?;
/// let output = handle.result().await?;
/// ```
#[async_trait]
pub trait Executor: Send + Sync {
    /// Start a run and return immediately
    ///
    /// The run observes cancellation of `ctx`. Errors returned here are
    /// validation errors only; failures of the run itself surface through
    /// [`WorkflowHandle::result`].
    async fn start(
        &self,
        ctx: &CancellationToken,
        workflow: WorkflowFn,
        input: Value,
        options: StartOptions,
    ) -> Result<Box<dyn WorkflowHandle>, ExecutorError>;

    /// Deliver a signal to a running workflow
    async fn signal(&self, workflow_id: &str, signal: Signal) -> Result<(), ExecutorError>;

    /// Ask a workflow a question; [`STATUS_QUERY`] is always supported
    async fn query(&self, workflow_id: &str, query_type: &str) -> Result<Value, ExecutorError>;

    /// Request cancellation of a run
    async fn cancel(&self, workflow_id: &str) -> Result<(), ExecutorError>;
}
