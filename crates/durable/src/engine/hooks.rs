//! Lifecycle callbacks for workflow runs

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::workflow::WorkflowError;

type ValueHook = Arc<dyn Fn(&str, &Value) + Send + Sync>;
type ErrorHook = Arc<dyn Fn(&str, &WorkflowError) + Send + Sync>;

/// Optional callbacks invoked around workflow runs
///
/// Hooks are observers: they run on the workflow task, receive the workflow ID,
/// and cannot change the outcome. `on_workflow_fail` fires for both failed and
/// canceled runs.
///
/// # Example
///
/// ```
/// use weft_durable::ExecutorHooks;
///
/// let hooks = ExecutorHooks::new()
///     .on_workflow_complete(|id, output| println!("{id} finished with {output}"));
/// ```
#[derive(Clone, Default)]
pub struct ExecutorHooks {
    on_start: Option<ValueHook>,
    on_complete: Option<ValueHook>,
    on_fail: Option<ErrorHook>,
}

impl ExecutorHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the input when a run starts executing
    pub fn on_workflow_start(mut self, f: impl Fn(&str, &Value) + Send + Sync + 'static) -> Self {
        self.on_start = Some(Arc::new(f));
        self
    }

    /// Called with the output when a run completes
    pub fn on_workflow_complete(
        mut self,
        f: impl Fn(&str, &Value) + Send + Sync + 'static,
    ) -> Self {
        self.on_complete = Some(Arc::new(f));
        self
    }

    /// Called with the error when a run fails or is canceled
    pub fn on_workflow_fail(
        mut self,
        f: impl Fn(&str, &WorkflowError) + Send + Sync + 'static,
    ) -> Self {
        self.on_fail = Some(Arc::new(f));
        self
    }

    pub(crate) fn workflow_started(&self, workflow_id: &str, input: &Value) {
        if let Some(hook) = &self.on_start {
            hook(workflow_id, input);
        }
    }

    pub(crate) fn workflow_completed(&self, workflow_id: &str, output: &Value) {
        if let Some(hook) = &self.on_complete {
            hook(workflow_id, output);
        }
    }

    pub(crate) fn workflow_failed(&self, workflow_id: &str, error: &WorkflowError) {
        if let Some(hook) = &self.on_fail {
            hook(workflow_id, error);
        }
    }
}

impl fmt::Debug for ExecutorHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHooks")
            .field("on_workflow_start", &self.on_start.is_some())
            .field("on_workflow_complete", &self.on_complete.is_some())
            .field("on_workflow_fail", &self.on_fail.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_hooks_are_optional() {
        let hooks = ExecutorHooks::new();
        hooks.workflow_started("wf", &Value::Null);
        hooks.workflow_completed("wf", &Value::Null);
        hooks.workflow_failed("wf", &WorkflowError::Canceled);
    }

    #[test]
    fn test_hooks_receive_workflow_id() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let started = seen.clone();
        let failed = seen.clone();

        let hooks = ExecutorHooks::new()
            .on_workflow_start(move |id, _| started.lock().push(format!("start:{id}")))
            .on_workflow_fail(move |id, err| failed.lock().push(format!("fail:{id}:{err}")));

        hooks.workflow_started("wf-1", &Value::Null);
        hooks.workflow_completed("wf-1", &Value::Null);
        hooks.workflow_failed("wf-1", &WorkflowError::Canceled);

        assert_eq!(
            *seen.lock(),
            vec!["start:wf-1".to_string(), "fail:wf-1:workflow canceled".to_string()]
        );
    }
}
