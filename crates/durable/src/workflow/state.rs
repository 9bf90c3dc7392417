//! Workflow status and persisted state records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of a workflow run
///
/// ```text
/// Pending --start--> Running --return--> Completed
///                       |----error-----> Failed
///                       `----cancel----> Canceled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Workflow created but not started
    Pending,

    /// Workflow is running
    Running,

    /// Workflow completed successfully
    Completed,

    /// Workflow failed
    Failed,

    /// Workflow was canceled
    Canceled,
}

impl WorkflowStatus {
    /// Completed, Failed and Canceled never transition again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

/// Persistence record for one workflow
///
/// `workflow_id` is the primary key within a store; `run_id` tells apart
/// separate executions of the same workflow ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub run_id: String,
    pub status: WorkflowStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Fresh `Pending` record
    pub fn new(workflow_id: impl Into<String>, run_id: impl Into<String>, input: Value) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            run_id: run_id.into(),
            status: WorkflowStatus::Pending,
            input,
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `status`, bumping `updated_at`
    pub fn transition(&mut self, status: WorkflowStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Query descriptor for [`WorkflowStore::list`](crate::persistence::WorkflowStore::list)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowFilter {
    /// Only return entries with this status
    pub status: Option<WorkflowStatus>,

    /// Maximum number of entries; 0 means unbounded
    pub limit: usize,
}

impl WorkflowFilter {
    pub fn with_status(status: WorkflowStatus) -> Self {
        Self {
            status: Some(status),
            limit: 0,
        }
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn matches(&self, state: &WorkflowState) -> bool {
        self.status.map_or(true, |status| state.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Canceled.is_terminal());
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&WorkflowStatus::Canceled).unwrap();
        assert_eq!(json, "\"canceled\"");
        assert_eq!(WorkflowStatus::Running.to_string(), "running");
    }

    #[test]
    fn test_transition_bumps_updated_at() {
        let mut state = WorkflowState::new("wf-1", "run-1", Value::Null);
        let created = state.updated_at;

        state.transition(WorkflowStatus::Running);

        assert_eq!(state.status, WorkflowStatus::Running);
        assert!(state.updated_at >= created);
        assert_eq!(state.created_at, created);
    }

    #[test]
    fn test_filter_matches() {
        let state = WorkflowState::new("wf-1", "run-1", Value::Null);

        assert!(WorkflowFilter::default().matches(&state));
        assert!(WorkflowFilter::with_status(WorkflowStatus::Pending).matches(&state));
        assert!(!WorkflowFilter::with_status(WorkflowStatus::Failed).matches(&state));
    }
}
