//! Memory shared between the steps of a chain

use std::fmt;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};

use crate::step::StepError;

/// Key under which [`SharedMemory`] keeps the input/output history
pub const HISTORY_KEY: &str = "history";

/// Mutable key/value state visible to every step of a chain
///
/// Before the first step, the chain merges [`load_variables`] into object
/// inputs; after the last step succeeds it calls [`save_context`] with the
/// original input and the final output.
///
/// [`load_variables`]: Memory::load_variables
/// [`save_context`]: Memory::save_context
#[async_trait]
pub trait Memory: Send + Sync {
    fn get(&self, key: &str) -> Option<Value>;

    fn set(&self, key: &str, value: Value);

    /// Variables to merge into the chain input
    async fn load_variables(&self, input: &Value) -> Result<Map<String, Value>, StepError>;

    /// Record a completed invocation
    async fn save_context(&self, input: &Value, output: &Value) -> Result<(), StepError>;

    fn clear(&self);
}

/// In-process [`Memory`] behind a read/write lock
///
/// `save_context` appends `{"input", "output"}` to the [`HISTORY_KEY`] array;
/// `load_variables` returns every stored variable, history included.
#[derive(Default)]
pub struct SharedMemory {
    variables: RwLock<Map<String, Value>>,
}

impl SharedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables(variables: Map<String, Value>) -> Self {
        Self {
            variables: RwLock::new(variables),
        }
    }

    pub fn snapshot(&self) -> Map<String, Value> {
        self.variables.read().clone()
    }

    pub fn history(&self) -> Vec<Value> {
        match self.variables.read().get(HISTORY_KEY) {
            Some(Value::Array(entries)) => entries.clone(),
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl Memory for SharedMemory {
    fn get(&self, key: &str) -> Option<Value> {
        self.variables.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) {
        self.variables.write().insert(key.to_string(), value);
    }

    async fn load_variables(&self, _input: &Value) -> Result<Map<String, Value>, StepError> {
        Ok(self.snapshot())
    }

    async fn save_context(&self, input: &Value, output: &Value) -> Result<(), StepError> {
        let mut variables = self.variables.write();
        let entry = json!({ "input": input, "output": output });
        match variables.get_mut(HISTORY_KEY) {
            Some(Value::Array(entries)) => entries.push(entry),
            _ => {
                variables.insert(HISTORY_KEY.to_string(), Value::Array(vec![entry]));
            }
        }
        Ok(())
    }

    fn clear(&self) {
        self.variables.write().clear();
    }
}

impl fmt::Debug for SharedMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedMemory")
            .field("keys", &self.variables.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_clear() {
        let memory = SharedMemory::new();
        assert_eq!(memory.get("user"), None);

        memory.set("user", json!("ada"));
        assert_eq!(memory.get("user"), Some(json!("ada")));

        memory.clear();
        assert!(memory.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_save_context_appends_history() {
        let memory = SharedMemory::new();

        memory.save_context(&json!("q1"), &json!("a1")).await.unwrap();
        memory.save_context(&json!("q2"), &json!("a2")).await.unwrap();

        assert_eq!(
            memory.history(),
            vec![
                json!({"input": "q1", "output": "a1"}),
                json!({"input": "q2", "output": "a2"}),
            ]
        );
    }

    #[tokio::test]
    async fn test_load_variables_includes_history() {
        let mut initial = Map::new();
        initial.insert("user".to_string(), json!("ada"));
        let memory = SharedMemory::with_variables(initial);
        memory.save_context(&json!({}), &json!("hi")).await.unwrap();

        let variables = memory.load_variables(&Value::Null).await.unwrap();
        assert_eq!(variables.get("user"), Some(&json!("ada")));
        assert_eq!(variables[HISTORY_KEY].as_array().map(Vec::len), Some(1));
    }
}
