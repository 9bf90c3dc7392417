//! In-memory implementation of WorkflowStore

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::store::{StoreError, WorkflowStore};
use crate::workflow::{WorkflowFilter, WorkflowState};

/// In-memory implementation of [`WorkflowStore`]
///
/// Records live in a private map guarded by a mutex; `load` and `list` hand
/// out clones, so callers never observe later mutations.
///
/// # Example
///
/// ```
/// use weft_durable::InMemoryWorkflowStore;
///
/// let store = InMemoryWorkflowStore::new();
/// assert!(store.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    states: Mutex<HashMap<String, WorkflowState>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.lock().is_empty()
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn save(&self, state: WorkflowState) -> Result<(), StoreError> {
        if state.workflow_id.is_empty() {
            return Err(StoreError::MissingWorkflowId);
        }
        self.states.lock().insert(state.workflow_id.clone(), state);
        Ok(())
    }

    async fn load(&self, workflow_id: &str) -> Result<Option<WorkflowState>, StoreError> {
        Ok(self.states.lock().get(workflow_id).cloned())
    }

    async fn list(&self, filter: WorkflowFilter) -> Result<Vec<WorkflowState>, StoreError> {
        let mut matching: Vec<WorkflowState> = self
            .states
            .lock()
            .values()
            .filter(|state| filter.matches(state))
            .cloned()
            .collect();

        matching.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.workflow_id.cmp(&b.workflow_id))
        });
        if filter.limit > 0 {
            matching.truncate(filter.limit);
        }
        Ok(matching)
    }

    async fn delete(&self, workflow_id: &str) -> Result<(), StoreError> {
        self.states.lock().remove(workflow_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::WorkflowStatus;
    use serde_json::json;

    fn state(id: &str, status: WorkflowStatus) -> WorkflowState {
        let mut state = WorkflowState::new(id, format!("{id}-run"), json!({}));
        state.transition(status);
        state
    }

    #[tokio::test]
    async fn test_save_and_load_roundtrip() {
        let store = InMemoryWorkflowStore::new();
        let mut saved = WorkflowState::new("wf-1", "run-1", json!({"order": 7}));
        saved.transition(WorkflowStatus::Completed);
        saved.output = Some(json!("shipped"));

        store.save(saved.clone()).await.unwrap();

        let loaded = store.load("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn test_load_unknown_returns_none() {
        let store = InMemoryWorkflowStore::new();
        assert_eq!(store.load("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_save_rejects_empty_id() {
        let store = InMemoryWorkflowStore::new();
        let result = store.save(WorkflowState::new("", "run", json!(null))).await;

        assert_eq!(result, Err(StoreError::MissingWorkflowId));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_save_upserts() {
        let store = InMemoryWorkflowStore::new();
        store.save(state("wf-1", WorkflowStatus::Running)).await.unwrap();
        store.save(state("wf-1", WorkflowStatus::Failed)).await.unwrap();

        assert_eq!(store.len(), 1);
        let loaded = store.load("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = InMemoryWorkflowStore::new();
        store.save(state("wf-1", WorkflowStatus::Completed)).await.unwrap();

        store.delete("wf-1").await.unwrap();
        store.delete("wf-1").await.unwrap();
        store.delete("never-existed").await.unwrap();

        assert_eq!(store.load("wf-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_filters_by_status_and_limit() {
        let store = InMemoryWorkflowStore::new();
        store.save(state("a", WorkflowStatus::Running)).await.unwrap();
        store.save(state("b", WorkflowStatus::Running)).await.unwrap();
        store.save(state("c", WorkflowStatus::Completed)).await.unwrap();

        let running = store
            .list(WorkflowFilter::with_status(WorkflowStatus::Running))
            .await
            .unwrap();
        assert_eq!(running.len(), 2);
        assert!(running.iter().all(|s| s.status == WorkflowStatus::Running));

        let limited = store
            .list(WorkflowFilter::with_status(WorkflowStatus::Running).limit(1))
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);

        let everything = store.list(WorkflowFilter::default()).await.unwrap();
        assert_eq!(everything.len(), 3);
    }

    #[tokio::test]
    async fn test_list_orders_by_creation_then_id() {
        let store = InMemoryWorkflowStore::new();
        let mut first = state("z", WorkflowStatus::Pending);
        let mut second = state("a", WorkflowStatus::Pending);
        let mut third = state("b", WorkflowStatus::Pending);
        let t0 = chrono::Utc::now();
        first.created_at = t0;
        second.created_at = t0 + chrono::Duration::seconds(1);
        third.created_at = t0 + chrono::Duration::seconds(1);

        store.save(third).await.unwrap();
        store.save(first).await.unwrap();
        store.save(second).await.unwrap();

        let ids: Vec<String> = store
            .list(WorkflowFilter::default())
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.workflow_id)
            .collect();
        assert_eq!(ids, vec!["z", "a", "b"]);
    }
}
