//! In-process executor: one tokio task per workflow run

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::context::InMemoryWorkflowContext;
use super::mailbox::SignalMailbox;
use crate::engine::{
    Config, Executor, ExecutorError, ExecutorHooks, WorkflowHandle, STATUS_QUERY,
};
use crate::persistence::{InMemoryWorkflowStore, WorkflowStore};
use crate::reliability::RetryPolicy;
use crate::workflow::{
    Signal, StartOptions, WorkflowContext, WorkflowError, WorkflowFn, WorkflowState,
    WorkflowStatus,
};

/// Configuration for the in-process executor
#[derive(Debug, Clone)]
pub struct InMemoryExecutorConfig {
    /// Execution timeout for runs started without one; `None` means unbounded
    pub default_timeout: Option<Duration>,

    /// Policy for activities invoked without a retry policy
    pub default_retry_policy: RetryPolicy,

    /// Finished runs kept addressable for signal/query/cancel; older ones
    /// are evicted in completion order
    pub max_finished_runs: usize,
}

pub const DEFAULT_MAX_FINISHED_RUNS: usize = 1024;

impl Default for InMemoryExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: None,
            default_retry_policy: RetryPolicy::no_retry(),
            max_finished_runs: DEFAULT_MAX_FINISHED_RUNS,
        }
    }
}

impl InMemoryExecutorConfig {
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_default_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_retry_policy = policy;
        self
    }

    pub fn with_max_finished_runs(mut self, max_finished_runs: usize) -> Self {
        self.max_finished_runs = max_finished_runs;
        self
    }
}

/// Lifecycle of one run as published to handles
#[derive(Debug, Clone)]
enum RunPhase {
    Pending,
    Running,
    Finished(Result<Value, WorkflowError>),
}

impl RunPhase {
    fn status(&self) -> WorkflowStatus {
        match self {
            Self::Pending => WorkflowStatus::Pending,
            Self::Running => WorkflowStatus::Running,
            Self::Finished(Ok(_)) => WorkflowStatus::Completed,
            Self::Finished(Err(WorkflowError::Canceled)) => WorkflowStatus::Canceled,
            Self::Finished(Err(_)) => WorkflowStatus::Failed,
        }
    }

    fn is_finished(&self) -> bool {
        matches!(self, Self::Finished(_))
    }
}

/// Executor-side record of a run
struct RunEntry {
    run_id: String,
    cancel: CancellationToken,
    mailbox: Arc<SignalMailbox>,
    phase: watch::Sender<RunPhase>,
}

impl RunEntry {
    fn status(&self) -> WorkflowStatus {
        self.phase.borrow().status()
    }

    fn set_phase(&self, phase: RunPhase) {
        self.phase.send_replace(phase);
    }
}

/// Run table shared between the executor and its run tasks
#[derive(Default)]
struct RunTable {
    runs: DashMap<String, Arc<RunEntry>>,
    /// (workflow_id, run_id) of finished runs, oldest first
    finished: Mutex<VecDeque<(String, String)>>,
}

impl RunTable {
    /// Remember a finished run and evict the oldest beyond `limit`
    fn retire(&self, workflow_id: &str, run_id: &str, limit: usize) {
        let evicted: Vec<_> = {
            let mut finished = self.finished.lock();
            finished.push_back((workflow_id.to_string(), run_id.to_string()));
            let excess = finished.len().saturating_sub(limit);
            finished.drain(..excess).collect()
        };
        for (workflow_id, run_id) in evicted {
            self.forget_run(&workflow_id, &run_id);
        }
    }

    /// Drop the entry only if it still belongs to this finished run
    fn forget_run(&self, workflow_id: &str, run_id: &str) -> bool {
        self.runs
            .remove_if(workflow_id, |_, entry| {
                entry.run_id == run_id && entry.status().is_terminal()
            })
            .is_some()
    }
}

/// In-process [`Executor`]
///
/// Every run is a tokio task with real timers; signals go through a per-run
/// mailbox and state transitions are written to a [`WorkflowStore`]
/// (best-effort: store failures are logged and never abort a run). Nothing
/// survives a process restart.
///
/// Finished runs stay addressable up to
/// [`max_finished_runs`](InMemoryExecutorConfig::max_finished_runs); handles
/// keep working after their run is evicted.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use serde_json::json;
/// use tokio_util::sync::CancellationToken;
/// use weft_durable::{Executor, InMemoryExecutor, StartOptions, WorkflowFn};
///
/// # tokio_test::block_on(async {
/// let executor = InMemoryExecutor::new();
/// let workflow = WorkflowFn::new("greet", |_ctx, input| async move {
///     Ok(json!(format!("hello {}", input.as_str().unwrap_or_default())))
/// });
///
/// let handle = executor
///     .start(&CancellationToken::new(), workflow, json!("world"), StartOptions::default())
///     .await
///     .unwrap();
/// assert_eq!(handle.result().await.unwrap(), json!("hello world"));
/// # });
/// ```
pub struct InMemoryExecutor {
    config: InMemoryExecutorConfig,
    store: Arc<dyn WorkflowStore>,
    hooks: ExecutorHooks,
    table: Arc<RunTable>,
}

impl Default for InMemoryExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryExecutor {
    /// Executor with default configuration and its own in-memory store
    pub fn new() -> Self {
        Self::with_config(InMemoryExecutorConfig::default())
    }

    pub fn with_config(config: InMemoryExecutorConfig) -> Self {
        Self {
            config,
            store: Arc::new(InMemoryWorkflowStore::new()),
            hooks: ExecutorHooks::default(),
            table: Arc::new(RunTable::default()),
        }
    }

    /// Build from registry configuration
    ///
    /// `Config.default_timeout` becomes the run timeout; a client of type
    /// `Arc<dyn WorkflowStore>` replaces the private store.
    pub fn from_config(config: &Config) -> Self {
        let mut executor = Self::with_config(InMemoryExecutorConfig {
            default_timeout: config.default_timeout,
            ..Default::default()
        });
        if let Some(store) = config.client_as::<Arc<dyn WorkflowStore>>() {
            executor.store = store.clone();
        }
        executor
    }

    pub fn with_store(mut self, store: Arc<dyn WorkflowStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_hooks(mut self, hooks: ExecutorHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Store receiving this executor's state transitions
    pub fn store(&self) -> Arc<dyn WorkflowStore> {
        self.store.clone()
    }

    /// Runs currently addressable by workflow id
    pub fn tracked_runs(&self) -> usize {
        self.table.runs.len()
    }

    /// Release a finished run; returns false if it is unknown or still active
    pub fn forget(&self, workflow_id: &str) -> bool {
        let Some(run_id) = self.table.runs.get(workflow_id).map(|entry| entry.run_id.clone()) else {
            return false;
        };
        let forgotten = self.table.forget_run(workflow_id, &run_id);
        if forgotten {
            self.table
                .finished
                .lock()
                .retain(|(id, run)| !(id == workflow_id && run == &run_id));
        }
        forgotten
    }

    fn entry(&self, workflow_id: &str) -> Result<Arc<RunEntry>, ExecutorError> {
        self.table
            .runs
            .get(workflow_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ExecutorError::WorkflowNotFound(workflow_id.to_string()))
    }
}

#[async_trait]
impl Executor for InMemoryExecutor {
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
            .unwrap_or_else(|| format!("wf-{}", Uuid::now_v7()));
        let run_id = Uuid::now_v7().to_string();
        let timeout = options.timeout.or(self.config.default_timeout);

        let (phase_tx, phase_rx) = watch::channel(RunPhase::Pending);
        let entry = Arc::new(RunEntry {
            run_id: run_id.clone(),
            cancel: ctx.child_token(),
            mailbox: Arc::new(SignalMailbox::new()),
            phase: phase_tx,
        });

        match self.table.runs.entry(workflow_id.clone()) {
            Entry::Occupied(mut occupied) => {
                if !occupied.get().status().is_terminal() {
                    return Err(ExecutorError::AlreadyRunning(workflow_id));
                }
                occupied.insert(entry.clone());
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry.clone());
            }
        }

        let state = WorkflowState::new(workflow_id.clone(), run_id.clone(), input.clone());
        persist(self.store.as_ref(), &state).await;

        info!(
            workflow_id = %workflow_id,
            run_id = %run_id,
            workflow = %workflow.name(),
            "starting in-memory workflow"
        );

        let span = tracing::info_span!(
            "workflow",
            workflow_id = %workflow_id,
            run_id = %run_id,
            workflow = %workflow.name()
        );
        let run = WorkflowRun {
            entry,
            state,
            store: self.store.clone(),
            hooks: self.hooks.clone(),
            default_retry_policy: self.config.default_retry_policy.clone(),
            timeout,
            table: self.table.clone(),
            max_finished_runs: self.config.max_finished_runs,
        };
        tokio::spawn(run.drive(workflow, input).instrument(span));

        Ok(Box::new(InMemoryHandle {
            workflow_id,
            run_id,
            phase: phase_rx,
        }))
    }

    async fn signal(&self, workflow_id: &str, signal: Signal) -> Result<(), ExecutorError> {
        let entry = self.entry(workflow_id)?;
        if !entry.mailbox.deliver(&signal.name, signal.payload) {
            return Err(ExecutorError::NotRunning(workflow_id.to_string()));
        }
        debug!(workflow_id, signal = %signal.name, "signal delivered");
        Ok(())
    }

    async fn query(&self, workflow_id: &str, query_type: &str) -> Result<Value, ExecutorError> {
        let entry = self.entry(workflow_id)?;
        match query_type {
            STATUS_QUERY => serde_json::to_value(entry.status())
                .map_err(|e| ExecutorError::Backend(e.to_string())),
            other => Err(ExecutorError::UnknownQuery(other.to_string())),
        }
    }

    async fn cancel(&self, workflow_id: &str) -> Result<(), ExecutorError> {
        let entry = self.entry(workflow_id)?;
        info!(workflow_id, run_id = %entry.run_id, "canceling in-memory workflow");
        entry.cancel.cancel();
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryExecutor")
            .field("config", &self.config)
            .field("runs", &self.table.runs.len())
            .finish()
    }
}

/// Everything the run task owns
struct WorkflowRun {
    entry: Arc<RunEntry>,
    state: WorkflowState,
    store: Arc<dyn WorkflowStore>,
    hooks: ExecutorHooks,
    default_retry_policy: RetryPolicy,
    timeout: Option<Duration>,
    table: Arc<RunTable>,
    max_finished_runs: usize,
}

impl WorkflowRun {
    async fn drive(mut self, workflow: WorkflowFn, input: Value) {
        let workflow_id = self.state.workflow_id.clone();
        let cancel = self.entry.cancel.clone();

        self.state.transition(WorkflowStatus::Running);
        persist(self.store.as_ref(), &self.state).await;
        self.entry.set_phase(RunPhase::Running);
        self.hooks.workflow_started(&workflow_id, &input);

        let ctx: Arc<dyn WorkflowContext> = Arc::new(InMemoryWorkflowContext::new(
            workflow_id.clone(),
            self.entry.run_id.clone(),
            cancel.clone(),
            self.entry.mailbox.clone(),
            self.default_retry_policy.clone(),
        ));

        // A panicking body still has to reach a terminal phase
        let body = AssertUnwindSafe(workflow.call(ctx, input))
            .catch_unwind()
            .map(|result| result.unwrap_or_else(|_| Err(WorkflowError::Failed("workflow panicked".into()))));
        let timeout = self.timeout;
        let guarded = async move {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, body)
                    .await
                    .unwrap_or(Err(WorkflowError::Timeout(limit))),
                None => body.await,
            }
        };

        let mut outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WorkflowError::Canceled),
            outcome = guarded => outcome,
        };
        // A failure racing a cancel request is reported as canceled
        if outcome.is_err() && cancel.is_cancelled() {
            outcome = Err(WorkflowError::Canceled);
        }

        let phase = RunPhase::Finished(outcome);
        self.state.transition(phase.status());
        match &phase {
            RunPhase::Finished(Ok(output)) => {
                self.state.output = Some(output.clone());
                persist(self.store.as_ref(), &self.state).await;
                info!("workflow completed");
                self.hooks.workflow_completed(&workflow_id, output);
            }
            RunPhase::Finished(Err(error)) => {
                self.state.error = Some(error.to_string());
                persist(self.store.as_ref(), &self.state).await;
                if error.is_canceled() {
                    info!("workflow canceled");
                } else {
                    warn!(error = %error, "workflow failed");
                }
                self.hooks.workflow_failed(&workflow_id, error);
            }
            _ => {}
        }

        self.entry.mailbox.close();
        self.entry.set_phase(phase);
        self.table
            .retire(&workflow_id, &self.entry.run_id, self.max_finished_runs);
    }
}

async fn persist(store: &dyn WorkflowStore, state: &WorkflowState) {
    if let Err(e) = store.save(state.clone()).await {
        warn!(
            workflow_id = %state.workflow_id,
            status = %state.status,
            error = %e,
            "failed to persist workflow state"
        );
    }
}

/// Handle to an in-process run
#[derive(Debug)]
pub struct InMemoryHandle {
    workflow_id: String,
    run_id: String,
    phase: watch::Receiver<RunPhase>,
}

#[async_trait]
impl WorkflowHandle for InMemoryHandle {
    fn id(&self) -> &str {
        &self.workflow_id
    }

    fn run_id(&self) -> &str {
        &self.run_id
    }

    async fn status(&self) -> Result<WorkflowStatus, ExecutorError> {
        Ok(self.phase.borrow().status())
    }

    async fn result(&self) -> Result<Value, WorkflowError> {
        let mut phase = self.phase.clone();
        let finished = phase
            .wait_for(RunPhase::is_finished)
            .await
            .map(|phase| (*phase).clone())
            .map_err(|_| WorkflowError::Backend("workflow task ended without an outcome".into()))?;

        match finished {
            RunPhase::Finished(outcome) => outcome,
            _ => Err(WorkflowError::Backend("workflow has no outcome".into())),
        }
    }
}
