//! WorkflowContext that forwards every operation to the engine

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::client::{EngineError, EngineWorkflowContext, NativeActivityOptions};
use super::retry::to_native_retry_policy;
use crate::activity::Activity;
use crate::workflow::{
    ActivityOptions, CancellationFuture, SignalReceiver, WorkflowContext, WorkflowError,
};

/// Replay-safe [`WorkflowContext`]
///
/// Holds no clocks, tasks or random state of its own: time, timers,
/// activities and signals all come from the engine context, so a replay sees
/// exactly the decisions of the original execution.
pub(crate) struct DurableWorkflowContext {
    engine: Arc<dyn EngineWorkflowContext>,
    task_queue: String,
    execution_timeout: Duration,
}

impl DurableWorkflowContext {
    pub(crate) fn new(
        engine: Arc<dyn EngineWorkflowContext>,
        task_queue: String,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            engine,
            task_queue,
            execution_timeout,
        }
    }

    fn map_error(&self, error: EngineError) -> WorkflowError {
        error.into_workflow_error(self.execution_timeout)
    }
}

#[async_trait]
impl WorkflowContext for DurableWorkflowContext {
    fn workflow_id(&self) -> &str {
        self.engine.workflow_id()
    }

    fn run_id(&self) -> &str {
        self.engine.run_id()
    }

    fn now(&self) -> DateTime<Utc> {
        self.engine.now()
    }

    async fn execute_activity(
        &self,
        activity: &Activity,
        input: Value,
        options: ActivityOptions,
    ) -> Result<Value, WorkflowError> {
        let native = NativeActivityOptions {
            task_queue: self.task_queue.clone(),
            start_to_close_timeout: options.start_to_close_timeout,
            retry_policy: to_native_retry_policy(options.retry_policy.as_ref()),
        };

        self.engine
            .execute_activity(activity, input, native)
            .await
            .map_err(|e| self.map_error(e))
    }

    async fn sleep(&self, duration: Duration) -> Result<(), WorkflowError> {
        self.engine
            .timer(duration)
            .await
            .map_err(|e| self.map_error(e))
    }

    fn receive_signal(&self, name: &str) -> SignalReceiver {
        self.engine.signal_channel(name)
    }

    // The engine surfaces cancellation through its own primitives; workflow
    // code checks err() or sees Canceled from sleep and activities.
    fn done(&self) -> CancellationFuture {
        CancellationFuture::never()
    }

    fn err(&self) -> Option<WorkflowError> {
        self.engine.is_canceled().then_some(WorkflowError::Canceled)
    }
}
