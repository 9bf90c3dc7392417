//! Activity and workflow start options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::reliability::{duration_millis, RetryPolicy};

/// Options for one activity invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityOptions {
    /// Retry policy; `None` uses the backend default
    pub retry_policy: Option<RetryPolicy>,

    /// Maximum time for a single attempt
    #[serde(with = "duration_millis")]
    pub start_to_close_timeout: Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            retry_policy: None,
            start_to_close_timeout: Duration::from_secs(300), // 5 minutes per attempt
        }
    }
}

impl ActivityOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }
}

/// Options for starting a workflow run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
    /// Workflow ID; generated when absent
    pub id: Option<String>,

    /// Execution timeout; falls back to the executor default
    pub timeout: Option<Duration>,
}

impl StartOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
