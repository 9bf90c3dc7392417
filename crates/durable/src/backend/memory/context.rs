//! WorkflowContext backed by real tokio timers and tasks

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn, Instrument};

use super::mailbox::SignalMailbox;
use crate::activity::{Activity, ActivityContext, ActivityError};
use crate::reliability::RetryPolicy;
use crate::workflow::{
    ActivityOptions, CancellationFuture, SignalReceiver, WorkflowContext, WorkflowError,
};

/// Context of one in-process run
///
/// Activities run inline on the workflow task; running several at once is a
/// matter of awaiting their futures together.
pub(crate) struct InMemoryWorkflowContext {
    workflow_id: String,
    run_id: String,
    cancel: CancellationToken,
    mailbox: Arc<SignalMailbox>,
    default_retry_policy: RetryPolicy,
    activity_seq: AtomicU64,
}

impl InMemoryWorkflowContext {
    pub(crate) fn new(
        workflow_id: String,
        run_id: String,
        cancel: CancellationToken,
        mailbox: Arc<SignalMailbox>,
        default_retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            workflow_id,
            run_id,
            cancel,
            mailbox,
            default_retry_policy,
            activity_seq: AtomicU64::new(0),
        }
    }

    async fn attempt(
        &self,
        activity: &Activity,
        ctx: ActivityContext,
        input: Value,
        timeout: Duration,
    ) -> Result<Value, ActivityError> {
        let name = activity.name().to_string();
        let call = AssertUnwindSafe(activity.call(ctx, input))
            .catch_unwind()
            .map(move |result| {
                result.unwrap_or_else(|_| {
                    Err(ActivityError::non_retryable(format!("activity {name} panicked")).with_type("PANIC"))
                })
            });
        if timeout.is_zero() {
            return call.await;
        }
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(
                ActivityError::retryable(format!("activity timed out after {timeout:?}"))
                    .with_type("TIMEOUT"),
            ),
        }
    }
}

#[async_trait]
impl WorkflowContext for InMemoryWorkflowContext {
    fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    fn run_id(&self) -> &str {
        &self.run_id
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn execute_activity(
        &self,
        activity: &Activity,
        input: Value,
        options: ActivityOptions,
    ) -> Result<Value, WorkflowError> {
        let seq = self.activity_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let activity_id = format!("{}-{}", activity.name(), seq);
        let policy = options
            .retry_policy
            .unwrap_or_else(|| self.default_retry_policy.clone());

        let mut attempt = 1;
        loop {
            if self.cancel.is_cancelled() {
                return Err(WorkflowError::Canceled);
            }

            let ctx = ActivityContext::new(
                self.workflow_id.clone(),
                activity_id.clone(),
                attempt,
                policy.max_attempts,
                self.cancel.child_token(),
            );
            let span = tracing::info_span!(
                "activity",
                activity = %activity.name(),
                activity_id = %activity_id,
                attempt
            );

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(WorkflowError::Canceled),
                result = self
                    .attempt(activity, ctx, input.clone(), options.start_to_close_timeout)
                    .instrument(span) => result,
            };

            let error = match result {
                Ok(output) => {
                    debug!(activity_id = %activity_id, attempt, "activity completed");
                    return Ok(output);
                }
                Err(error) => error,
            };

            if self.cancel.is_cancelled() {
                return Err(WorkflowError::Canceled);
            }

            if !policy.should_retry(&error) || !policy.has_attempts_remaining(attempt) {
                warn!(
                    activity_id = %activity_id,
                    attempt,
                    error = %error,
                    "activity failed, no attempts left"
                );
                return Err(WorkflowError::Activity {
                    activity: activity.name().to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            attempt += 1;
            let delay = policy.delay_for_attempt(attempt);
            debug!(
                activity_id = %activity_id,
                next_attempt = attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "activity failed, retrying"
            );

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(WorkflowError::Canceled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn sleep(&self, duration: Duration) -> Result<(), WorkflowError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(WorkflowError::Canceled),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }

    fn receive_signal(&self, name: &str) -> SignalReceiver {
        self.mailbox.receiver(name)
    }

    fn done(&self) -> CancellationFuture {
        CancellationFuture::from_token(self.cancel.clone())
    }

    fn err(&self) -> Option<WorkflowError> {
        self.cancel.is_cancelled().then_some(WorkflowError::Canceled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn context(cancel: CancellationToken) -> InMemoryWorkflowContext {
        InMemoryWorkflowContext::new(
            "wf-1".into(),
            "run-1".into(),
            cancel,
            Arc::new(SignalMailbox::new()),
            RetryPolicy::no_retry(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_retries_until_success() {
        let attempts = Arc::new(Mutex::new(Vec::new()));
        let seen = attempts.clone();
        let activity = Activity::new("flaky", move |ctx, input| {
            let seen = seen.clone();
            async move {
                seen.lock().push((ctx.attempt, ctx.activity_id.clone()));
                if ctx.attempt < 3 {
                    return Err(ActivityError::retryable("temporary error"));
                }
                Ok(json!(format!("processed: {}", input.as_str().unwrap_or_default())))
            }
        });

        let ctx = context(CancellationToken::new());
        let options = ActivityOptions::new()
            .with_retry_policy(RetryPolicy::fixed(Duration::from_millis(10), 5));
        let output = ctx
            .execute_activity(&activity, json!("data"), options)
            .await
            .unwrap();

        assert_eq!(output, json!("processed: data"));
        let attempts = attempts.lock();
        assert_eq!(attempts.len(), 3);
        // Activity ID is stable across retries
        assert!(attempts.iter().all(|(_, id)| id == "flaky-1"));
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let activity = Activity::new("validate", |_ctx, _input| async {
            Err::<Value, _>(ActivityError::non_retryable("bad input"))
        });

        let ctx = context(CancellationToken::new());
        let options = ActivityOptions::new().with_retry_policy(RetryPolicy::exponential());
        let err = ctx
            .execute_activity(&activity, json!(null), options)
            .await
            .unwrap_err();

        match err {
            WorkflowError::Activity { attempts, source, .. } => {
                assert_eq!(attempts, 1);
                assert_eq!(source.message, "bad input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout_is_an_activity_error() {
        let activity = Activity::new("slow", |_ctx, _input| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(json!("late"))
        });

        let ctx = context(CancellationToken::new());
        let options = ActivityOptions::new().with_start_to_close_timeout(Duration::from_millis(50));
        let err = ctx
            .execute_activity(&activity, json!(null), options)
            .await
            .unwrap_err();

        match err {
            WorkflowError::Activity { source, .. } => {
                assert_eq!(source.error_type.as_deref(), Some("TIMEOUT"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_observes_cancellation() {
        let cancel = CancellationToken::new();
        let ctx = context(cancel.clone());

        let canceler = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let result = ctx.sleep(Duration::from_secs(10)).await;
        canceler.await.unwrap();

        assert_eq!(result, Err(WorkflowError::Canceled));
        assert_eq!(ctx.err(), Some(WorkflowError::Canceled));
    }

    #[tokio::test]
    async fn test_err_is_none_while_running() {
        let ctx = context(CancellationToken::new());
        assert_eq!(ctx.err(), None);
        assert_eq!(ctx.workflow_id(), "wf-1");
        assert_eq!(ctx.run_id(), "run-1");
    }
}
