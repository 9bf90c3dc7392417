//! Workflow signals for external communication

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// External message delivered to a running workflow
///
/// Signals are consumed inside the workflow through
/// [`WorkflowContext::receive_signal`](super::WorkflowContext::receive_signal).
/// Whether a signal sent before anyone listens is buffered or dropped is up to
/// the backend: the in-memory backend buffers it, durable engines follow their
/// own history rules.
///
/// # Example
///
/// ```ignore
/// executor
///     .signal("order-42", Signal::new("approval", json!({"approved": true})))
///     .await?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    /// Signal name the workflow listens on
    pub name: String,

    /// Signal payload (JSON)
    pub payload: Value,

    /// When the signal was sent
    pub sent_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
            sent_at: Utc::now(),
        }
    }

    /// Signal without payload
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, Value::Null)
    }
}
