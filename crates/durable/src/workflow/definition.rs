//! Workflow function definition and workflow errors

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use super::WorkflowContext;
use crate::activity::ActivityError;

/// Terminal error of a workflow run, or of one workflow operation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    /// An activity failed and its retries are exhausted
    #[error("activity {activity} failed after {attempts} attempt(s): {source}")]
    Activity {
        activity: String,
        attempts: u32,
        source: ActivityError,
    },

    /// The run was canceled; always terminal and never retried
    #[error("workflow canceled")]
    Canceled,

    /// The run exceeded its execution timeout
    #[error("workflow timed out after {0:?}")]
    Timeout(Duration),

    /// Business-logic failure raised by the workflow function itself
    #[error("{0}")]
    Failed(String),

    /// The backend could not carry out the operation
    #[error("backend error: {0}")]
    Backend(String),
}

impl WorkflowError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

impl From<anyhow::Error> for WorkflowError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

type WorkflowBody = dyn Fn(Arc<dyn WorkflowContext>, Value) -> BoxFuture<'static, Result<Value, WorkflowError>>
    + Send
    + Sync;

/// The orchestrating function of a workflow
///
/// The body receives the backend's [`WorkflowContext`] and the start input.
/// Under a durable backend the body is replayed, so it must only reach the
/// outside world through the context: no direct I/O, wall-clock reads,
/// randomness or spawned tasks.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use weft_durable::WorkflowFn;
/// use serde_json::json;
///
/// let workflow = WorkflowFn::new("nap", |ctx, _input| async move {
///     ctx.sleep(Duration::from_secs(5)).await?;
///     Ok(json!("done after sleep"))
/// });
/// assert_eq!(workflow.name(), "nap");
/// ```
#[derive(Clone)]
pub struct WorkflowFn {
    name: Arc<str>,
    body: Arc<WorkflowBody>,
}

impl WorkflowFn {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Arc<dyn WorkflowContext>, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WorkflowError>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            body: Arc::new(move |ctx, input| f(ctx, input).boxed()),
        }
    }

    /// Workflow type name, used for logging and by durable engines
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(
        &self,
        ctx: Arc<dyn WorkflowContext>,
        input: Value,
    ) -> BoxFuture<'static, Result<Value, WorkflowError>> {
        (self.body)(ctx, input)
    }
}

impl fmt::Debug for WorkflowFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkflowFn").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        let error = WorkflowError::failed("something went wrong");
        assert_eq!(error.to_string(), "something went wrong");
    }

    #[test]
    fn test_activity_error_display_includes_source() {
        let error = WorkflowError::Activity {
            activity: "charge".into(),
            attempts: 3,
            source: ActivityError::retryable("card declined"),
        };
        assert_eq!(
            error.to_string(),
            "activity charge failed after 3 attempt(s): card declined"
        );
    }

    #[test]
    fn test_is_canceled() {
        assert!(WorkflowError::Canceled.is_canceled());
        assert!(!WorkflowError::Timeout(Duration::from_secs(1)).is_canceled());
    }
}
