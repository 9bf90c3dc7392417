//! WorkflowStore trait definition

use async_trait::async_trait;

use crate::workflow::{WorkflowFilter, WorkflowState};

/// Error type for store operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// `save` was called with an empty workflow id
    #[error("workflow id must not be empty")]
    MissingWorkflowId,

    /// The underlying storage failed
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Persistence of workflow state records
///
/// Implementations are safe for concurrent use. Writes issued by one executor
/// for one run are totally ordered.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    /// Insert or replace the record keyed by `state.workflow_id`
    async fn save(&self, state: WorkflowState) -> Result<(), StoreError>;

    /// Fetch a record; `Ok(None)` when the id is unknown
    async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StoreError>;

    /// Records matching `filter`, ordered by `created_at` then `workflow_id`
    async fn list(&self, filter: WorkflowFilter) -> Result<Vec<WorkflowState>, StoreError>;

    /// Remove a record; deleting an unknown id succeeds
    async fn delete(&self, workflow_id: &str) -> Result<(), StoreError>;
}
