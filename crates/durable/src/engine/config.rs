// Decision: backends are chosen by name at runtime. The backend name comes from
// WEFT_WORKFLOW_BACKEND ("inmemory" by default, or "durable"); the rest of the
// backend settings travel in Config, whose client slot is opaque so that the
// engine crate never depends on a particular durable engine SDK.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use serde_json::Value;

/// Name of the in-process backend
pub const INMEMORY_BACKEND: &str = "inmemory";

/// Name of the durable-engine backend
pub const DURABLE_BACKEND: &str = "durable";

/// Opaque backend client; each backend downcasts it to the type it expects
pub type ClientHandle = Arc<dyn Any + Send + Sync>;

/// Backend configuration passed to a registered factory
#[derive(Clone, Default)]
pub struct Config {
    /// Backend-specific client, required by the durable backend
    pub client: Option<ClientHandle>,

    /// Queue the durable engine dispatches workflows and activities on
    pub task_queue: Option<String>,

    /// Execution timeout for runs started without an explicit one
    pub default_timeout: Option<Duration>,

    /// Free-form backend options
    pub extra: HashMap<String, Value>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    ///
    /// Reads `WEFT_TASK_QUEUE` and `WEFT_DEFAULT_TIMEOUT_SECS`; unset variables
    /// leave the corresponding field empty.
    pub fn from_env() -> anyhow::Result<Self> {
        let task_queue = std::env::var("WEFT_TASK_QUEUE")
            .ok()
            .filter(|queue| !queue.trim().is_empty());

        let default_timeout = match std::env::var("WEFT_DEFAULT_TIMEOUT_SECS") {
            Ok(raw) if !raw.trim().is_empty() => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("invalid WEFT_DEFAULT_TIMEOUT_SECS: {raw}"))?;
                Some(Duration::from_secs(secs))
            }
            _ => None,
        };

        Ok(Self {
            client: None,
            task_queue,
            default_timeout,
            extra: HashMap::new(),
        })
    }

    pub fn with_client<C: Any + Send + Sync>(mut self, client: C) -> Self {
        self.client = Some(Arc::new(client));
        self
    }

    pub fn with_task_queue(mut self, task_queue: impl Into<String>) -> Self {
        self.task_queue = Some(task_queue.into());
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Downcast the client slot
    pub fn client_as<C: Any + Send + Sync>(&self) -> Option<&C> {
        self.client.as_ref().and_then(|client| client.downcast_ref::<C>())
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("client", &self.client.as_ref().map(|_| "<client>"))
            .field("task_queue", &self.task_queue)
            .field("default_timeout", &self.default_timeout)
            .field("extra", &self.extra)
            .finish()
    }
}

/// Backend name selected by `WEFT_WORKFLOW_BACKEND`, lowercased
pub fn backend_from_env() -> String {
    std::env::var("WEFT_WORKFLOW_BACKEND")
        .ok()
        .map(|name| name.trim().to_lowercase())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| INMEMORY_BACKEND.to_string())
}
