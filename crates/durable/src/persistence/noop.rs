//! Store that keeps nothing

use async_trait::async_trait;

use super::store::{StoreError, WorkflowStore};
use crate::workflow::{WorkflowFilter, WorkflowState};

/// [`WorkflowStore`] that discards writes and returns empty reads
///
/// Used where an external engine owns workflow state, so a second copy would
/// only drift from the authoritative one.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWorkflowStore;

#[async_trait]
impl WorkflowStore for NoopWorkflowStore {
    async fn save(&self, _state: WorkflowState) -> Result<(), StoreError> {
        Ok(())
    }

    async fn load(&self, _workflow_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        Ok(None)
    }

    async fn list(&self, _filter: WorkflowFilter) -> Result<Vec<WorkflowState>, StoreError> {
        Ok(Vec::new())
    }

    async fn delete(&self, _workflow_id: &str) -> Result<(), StoreError> {
        Ok(())
    }
}
