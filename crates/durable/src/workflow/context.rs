//! The execution surface handed to workflow functions

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::{ActivityOptions, WorkflowError};
use crate::activity::Activity;

/// Deterministic execution surface passed to a workflow function
///
/// Every operation that is not pure computation goes through this trait.
/// Backends implement it very differently: the in-memory backend uses real
/// timers, tasks and channels, while the durable backend forwards each call
/// to the engine's replay-safe primitives so that replaying history
/// reproduces the same decisions.
#[async_trait]
pub trait WorkflowContext: Send + Sync {
    fn workflow_id(&self) -> &str;

    fn run_id(&self) -> &str;

    /// Current time as seen by the workflow (engine time under replay)
    fn now(&self) -> DateTime<Utc>;

    /// Invoke an activity, retrying per `options.retry_policy`
    ///
    /// Returns the last activity error once retries are exhausted, or
    /// [`WorkflowError::Canceled`] when the run is canceled meanwhile.
    async fn execute_activity(
        &self,
        activity: &Activity,
        input: Value,
        options: ActivityOptions,
    ) -> Result<Value, WorkflowError>;

    /// Suspend the workflow; fails with [`WorkflowError::Canceled`] if the
    /// run is canceled before the timer fires
    async fn sleep(&self, duration: Duration) -> Result<(), WorkflowError>;

    /// Listen for one signal named `name`
    ///
    /// Creating the receiver never blocks; awaiting it does.
    fn receive_signal(&self, name: &str) -> SignalReceiver;

    /// Resolves when the run is canceled
    ///
    /// Durable backends may return a future that never resolves because the
    /// engine surfaces cancellation through its own primitives; check
    /// [`err`](Self::err) there.
    fn done(&self) -> CancellationFuture;

    /// `Some(WorkflowError::Canceled)` once the run has been canceled
    fn err(&self) -> Option<WorkflowError>;
}

/// Future yielding at most one signal payload
///
/// Resolves to `None` when the channel closes without a delivery, e.g. after
/// the run was canceled. Listeners must tolerate a receiver that never fires.
#[must_use = "signal receivers do nothing unless awaited"]
pub struct SignalReceiver {
    inner: BoxFuture<'static, Option<Value>>,
}

impl SignalReceiver {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Option<Value>> + Send + 'static,
    {
        Self {
            inner: future.boxed(),
        }
    }

    pub fn from_oneshot(rx: oneshot::Receiver<Value>) -> Self {
        Self::new(rx.map(Result::ok))
    }

    /// Receiver that resolves to `None` immediately
    pub fn closed() -> Self {
        Self::new(futures::future::ready(None))
    }
}

impl Future for SignalReceiver {
    type Output = Option<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for SignalReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalReceiver").finish_non_exhaustive()
    }
}

/// Future that completes when a workflow run is canceled
#[must_use = "cancellation futures do nothing unless awaited"]
pub struct CancellationFuture {
    inner: BoxFuture<'static, ()>,
}

impl CancellationFuture {
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            inner: token.cancelled_owned().boxed(),
        }
    }

    /// Never completes
    pub fn never() -> Self {
        Self {
            inner: futures::future::pending().boxed(),
        }
    }
}

impl Future for CancellationFuture {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.inner.as_mut().poll(cx)
    }
}

impl std::fmt::Debug for CancellationFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationFuture").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_signal_receiver_from_oneshot() {
        let (tx, rx) = oneshot::channel();
        let receiver = SignalReceiver::from_oneshot(rx);

        tx.send(json!("approved")).unwrap();
        assert_eq!(receiver.await, Some(json!("approved")));
    }

    #[tokio::test]
    async fn test_signal_receiver_resolves_none_when_sender_dropped() {
        let (tx, rx) = oneshot::channel::<Value>();
        let receiver = SignalReceiver::from_oneshot(rx);

        drop(tx);
        assert_eq!(receiver.await, None);
    }

    #[tokio::test]
    async fn test_cancellation_future_follows_token() {
        let token = CancellationToken::new();
        let done = CancellationFuture::from_token(token.clone());

        token.cancel();
        done.await;
    }

    #[tokio::test]
    async fn test_never_does_not_resolve() {
        let result = tokio::time::timeout(Duration::from_millis(20), CancellationFuture::never()).await;
        assert!(result.is_err());
    }
}
