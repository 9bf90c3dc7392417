use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::step::StepError;

/// A node that failed during a graph run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node: String,
    pub error: StepError,
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error in graph node {}: {}", self.node, self.error)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GraphError {
    #[error("node {0} already exists")]
    DuplicateNode(String),

    #[error("source node {0} not found")]
    UnknownSource(String),

    #[error("target node {0} not found")]
    UnknownTarget(String),

    #[error("edge {from} -> {to} would create a cycle")]
    Cycle { from: String, to: String },

    #[error("entry node {0} not found")]
    UnknownEntryPoint(String),

    #[error("finish node {0} not found")]
    UnknownFinishPoint(String),

    #[error("graph has no nodes")]
    Empty,

    #[error("node {0} is not reachable from any entry point")]
    Unreachable(String),

    #[error("no exit nodes defined")]
    NoExitNodes,

    #[error("graph timed out after {0:?}")]
    Timeout(Duration),

    #[error("graph run canceled")]
    Canceled,

    /// One or more nodes failed; `outputs` holds the finish points that
    /// still completed
    #[error("{} graph node(s) failed, first: {}", .failures.len(), first_failure(.failures))]
    NodesFailed {
        failures: Vec<NodeFailure>,
        outputs: Map<String, Value>,
    },
}

fn first_failure(failures: &[NodeFailure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_default()
}

impl From<GraphError> for StepError {
    fn from(err: GraphError) -> Self {
        match err {
            GraphError::Canceled => StepError::Canceled,
            GraphError::Timeout(limit) => StepError::Timeout(limit),
            other => StepError::Failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nodes_failed_names_first_failure() {
        let err = GraphError::NodesFailed {
            failures: vec![
                NodeFailure {
                    node: "failing".into(),
                    error: StepError::failed("boom"),
                },
                NodeFailure {
                    node: "other".into(),
                    error: StepError::failed("bang"),
                },
            ],
            outputs: Map::new(),
        };

        assert_eq!(
            err.to_string(),
            "2 graph node(s) failed, first: error in graph node failing: boom"
        );
    }

    #[test]
    fn test_cancel_and_timeout_keep_their_kind_as_step_errors() {
        assert_eq!(StepError::from(GraphError::Canceled), StepError::Canceled);
        assert_eq!(
            StepError::from(GraphError::Timeout(Duration::from_secs(1))),
            StepError::Timeout(Duration::from_secs(1))
        );
        assert_eq!(
            StepError::from(GraphError::Empty),
            StepError::failed("graph has no nodes")
        );
    }
}
