//! Executor that delegates runs to a durable engine

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::{DurableEngineClient, EngineError, EngineWorkflow, StartWorkflowRequest};
use super::context::DurableWorkflowContext;
use crate::engine::{
    ClientHandle, Config, Executor, ExecutorError, RegistryError, WorkflowHandle,
    DURABLE_BACKEND, STATUS_QUERY,
};
use crate::persistence::{NoopWorkflowStore, WorkflowStore};
use crate::workflow::{Signal, StartOptions, WorkflowContext, WorkflowError, WorkflowFn, WorkflowStatus};

/// Task queue used when none is configured
pub const DEFAULT_TASK_QUEUE: &str = "weft-workflows";

/// Execution timeout for runs started without one
pub const DEFAULT_WORKFLOW_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Wrap an engine client for [`Config::client`]
pub fn client_handle(client: Arc<dyn DurableEngineClient>) -> ClientHandle {
    Arc::new(client)
}

/// [`Executor`] backed by a durable engine
///
/// Workflow code never runs on a task of this executor: the engine executes
/// (and replays) it through [`EngineWorkflow`], and the handle reads status
/// and results back from the engine.
pub struct DurableExecutor {
    client: Arc<dyn DurableEngineClient>,
    task_queue: String,
    default_timeout: Duration,
}

impl DurableExecutor {
    pub fn new(client: Arc<dyn DurableEngineClient>) -> Self {
        Self {
            client,
            task_queue: DEFAULT_TASK_QUEUE.to_string(),
            default_timeout: DEFAULT_WORKFLOW_TIMEOUT,
        }
    }

    /// Build from registry configuration
    ///
    /// The client slot must hold an `Arc<dyn DurableEngineClient>` (see
    /// [`client_handle`]). The task queue comes from `Config.task_queue`, or
    /// else a `"task_queue"` string in `Config.extra`.
    pub fn from_config(config: Config) -> Result<Self, RegistryError> {
        let client = config
            .client
            .as_ref()
            .ok_or_else(|| RegistryError::MissingClient {
                backend: DURABLE_BACKEND.to_string(),
            })?
            .downcast_ref::<Arc<dyn DurableEngineClient>>()
            .cloned()
            .ok_or_else(|| RegistryError::InvalidClient {
                backend: DURABLE_BACKEND.to_string(),
                expected: "Arc<dyn DurableEngineClient>",
            })?;

        let mut executor = Self::new(client);
        let task_queue = config.task_queue.clone().or_else(|| {
            config
                .extra
                .get("task_queue")
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        if let Some(task_queue) = task_queue.filter(|queue| !queue.is_empty()) {
            executor.task_queue = task_queue;
        }
        if let Some(timeout) = config.default_timeout.filter(|t| !t.is_zero()) {
            executor.default_timeout = timeout;
        }
        Ok(executor)
    }

    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = task_queue.into();
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn task_queue(&self) -> &str {
        &self.task_queue
    }

    /// The engine owns workflow state, so the matching store keeps nothing
    pub fn store(&self) -> Arc<dyn WorkflowStore> {
        Arc::new(NoopWorkflowStore)
    }

    fn engine_workflow(&self, workflow: WorkflowFn, execution_timeout: Duration) -> EngineWorkflow {
        let task_queue = self.task_queue.clone();
        EngineWorkflow::new(workflow.name().to_string(), move |engine, input| {
            let ctx: Arc<dyn WorkflowContext> = Arc::new(DurableWorkflowContext::new(
                engine,
                task_queue.clone(),
                execution_timeout,
            ));
            workflow.call(ctx, input)
        })
    }
}

impl std::fmt::Debug for DurableExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableExecutor")
            .field("task_queue", &self.task_queue)
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

fn executor_error(workflow_id: &str, error: EngineError) -> ExecutorError {
    match error {
        EngineError::NotFound(_) => ExecutorError::WorkflowNotFound(workflow_id.to_string()),
        EngineError::AlreadyStarted(_) => ExecutorError::AlreadyRunning(workflow_id.to_string()),
        EngineError::UnknownQuery(query) => ExecutorError::UnknownQuery(query),
        other => ExecutorError::Backend(other.to_string()),
    }
}

#[async_trait]
impl Executor for DurableExecutor {
    async fn start(
        &self,
        ctx: &CancellationToken,
        workflow: WorkflowFn,
        input: Value,
        options: StartOptions,
    ) -> Result<Box<dyn WorkflowHandle>, ExecutorError> {
        let workflow_id = options
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("wf-{}", uuid::Uuid::now_v7()));
        let execution_timeout = options
            .timeout
            .filter(|t| !t.is_zero())
            .unwrap_or(self.default_timeout);

        let request = StartWorkflowRequest {
            workflow_id: workflow_id.clone(),
            task_queue: self.task_queue.clone(),
            execution_timeout,
            workflow: self.engine_workflow(workflow, execution_timeout),
            input,
        };

        let run_id = tokio::select! {
            biased;
            _ = ctx.cancelled() => {
                return Err(ExecutorError::Backend("start request canceled".into()));
            }
            started = self.client.start_workflow(request) => {
                started.map_err(|e| executor_error(&workflow_id, e))?
            }
        };

        info!(
            workflow_id = %workflow_id,
            run_id = %run_id,
            task_queue = %self.task_queue,
            "started durable workflow"
        );

        Ok(Box::new(DurableHandle {
            client: self.client.clone(),
            workflow_id,
            run_id,
            execution_timeout,
            outcome: OnceCell::new(),
        }))
    }

    async fn signal(&self, workflow_id: &str, signal: Signal) -> Result<(), ExecutorError> {
        debug!(workflow_id, signal = %signal.name, "signaling durable workflow");
        self.client
            .signal_workflow(workflow_id, &signal.name, signal.payload)
            .await
            .map_err(|e| executor_error(workflow_id, e))
    }

    async fn query(&self, workflow_id: &str, query_type: &str) -> Result<Value, ExecutorError> {
        if query_type == STATUS_QUERY {
            let status = self
                .client
                .describe_workflow(workflow_id, "")
                .await
                .map_err(|e| executor_error(workflow_id, e))?;
            return serde_json::to_value(status).map_err(|e| ExecutorError::Backend(e.to_string()));
        }

        self.client
            .query_workflow(workflow_id, query_type)
            .await
            .map_err(|e| executor_error(workflow_id, e))
    }

    async fn cancel(&self, workflow_id: &str) -> Result<(), ExecutorError> {
        info!(workflow_id, "canceling durable workflow");
        self.client
            .cancel_workflow(workflow_id)
            .await
            .map_err(|e| executor_error(workflow_id, e))
    }
}

/// Handle to a run owned by a durable engine
pub struct DurableHandle {
    client: Arc<dyn DurableEngineClient>,
    workflow_id: String,
    run_id: String,
    execution_timeout: Duration,
    outcome: OnceCell<Result<Value, WorkflowError>>,
}

impl std::fmt::Debug for DurableHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableHandle")
            .field("workflow_id", &self.workflow_id)
            .field("run_id", &self.run_id)
            .finish()
    }
}

#[async_trait]
impl WorkflowHandle for DurableHandle {
    fn id(&self) -> &str {
        &self.workflow_id
    }

    fn run_id(&self) -> &str {
        &self.run_id
    }

    async fn status(&self) -> Result<WorkflowStatus, ExecutorError> {
        if let Some(outcome) = self.outcome.get() {
            return Ok(match outcome {
                Ok(_) => WorkflowStatus::Completed,
                Err(WorkflowError::Canceled) => WorkflowStatus::Canceled,
                Err(_) => WorkflowStatus::Failed,
            });
        }

        self.client
            .describe_workflow(&self.workflow_id, &self.run_id)
            .await
            .map_err(|e| executor_error(&self.workflow_id, e))
    }

    async fn result(&self) -> Result<Value, WorkflowError> {
        if let Some(outcome) = self.outcome.get() {
            return outcome.clone();
        }

        let outcome = match self.client.await_result(&self.workflow_id, &self.run_id).await {
            Ok(output) => Ok(output),
            Err(err) if !err.is_terminal() => {
                // Transport trouble says nothing about the run; ask again next time
                warn!(workflow_id = %self.workflow_id, error = %err, "could not fetch workflow result");
                return Err(err.into_workflow_error(self.execution_timeout));
            }
            Err(err) => Err(err.into_workflow_error(self.execution_timeout)),
        };
        // Losing a race to another caller leaves the same terminal outcome in place
        let _ = self.outcome.set(outcome.clone());
        outcome
    }
}
