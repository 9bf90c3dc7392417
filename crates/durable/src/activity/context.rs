//! Activity execution context

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Context provided to activities during execution
///
/// The context provides:
/// - Information about the current execution attempt
/// - A stable `activity_id` that stays the same across retries, suitable as
///   an idempotency key for side effects
/// - Cancellation detection
///
/// # Example
///
/// ```ignore
/// Activity::new("index_documents", |ctx, input| async move {
///     for batch in batches(input) {
///         if ctx.is_cancelled() {
///             return Err(ActivityError::non_retryable("cancelled"));
///         }
///         index(batch, &ctx.activity_id).await?;
///     }
///     Ok(json!({"indexed": true}))
/// });
/// ```
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Unique execution attempt ID
    pub attempt_id: Uuid,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed (0 = unlimited)
    pub max_attempts: u32,

    /// Workflow that owns this activity
    pub workflow_id: String,

    /// Activity ID within the workflow, stable across retries
    pub activity_id: String,

    cancellation: CancellationToken,
}

impl ActivityContext {
    pub fn new(
        workflow_id: impl Into<String>,
        activity_id: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            attempt_id: Uuid::now_v7(),
            attempt,
            max_attempts,
            workflow_id: workflow_id.into(),
            activity_id: activity_id.into(),
            cancellation,
        }
    }

    /// Single-attempt context with its own cancellation token
    ///
    /// Used when an activity runs outside any executor, e.g. a chain invoked
    /// directly.
    pub fn detached(workflow_id: impl Into<String>, activity_id: impl Into<String>) -> Self {
        Self::new(workflow_id, activity_id, 1, 1, CancellationToken::new())
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves when cancellation is requested
    ///
    /// ```ignore
    /// tokio::select! {
    ///     result = do_work() => { ... }
    ///     _ = ctx.cancelled() => {
    ///         return Err(ActivityError::non_retryable("cancelled"));
    ///     }
    /// }
    /// ```
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }

    /// Token that is cancelled together with this activity
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_last_attempt(&self) -> bool {
        self.max_attempts != 0 && self.attempt >= self.max_attempts
    }
}
