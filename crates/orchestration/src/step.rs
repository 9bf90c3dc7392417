//! Steps: the unit of work graphs and chains are composed of

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream};
use futures::{FutureExt, Stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use weft_durable::{Activity, ActivityError};

use crate::memory::Memory;

/// Failure of a single step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("step canceled")]
    Canceled,

    #[error("step timed out after {0:?}")]
    Timeout(Duration),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::Failed(err.to_string())
    }
}

impl From<serde_json::Error> for StepError {
    fn from(err: serde_json::Error) -> Self {
        Self::Failed(format!("serialization: {err}"))
    }
}

impl From<ActivityError> for StepError {
    fn from(err: ActivityError) -> Self {
        Self::Failed(err.message)
    }
}

impl From<StepError> for ActivityError {
    fn from(err: StepError) -> Self {
        match err {
            StepError::Canceled => ActivityError::non_retryable("step canceled").with_type("CANCELED"),
            StepError::Timeout(limit) => {
                ActivityError::retryable(format!("step timed out after {limit:?}")).with_type("TIMEOUT")
            }
            StepError::Failed(message) => ActivityError::retryable(message),
        }
    }
}

/// Ambient state handed to every step invocation
///
/// Carries the cancellation token of the enclosing run and, inside a chain,
/// the chain's shared memory. Cloning is cheap.
#[derive(Clone, Default)]
pub struct StepContext {
    cancellation: CancellationToken,
    memory: Option<Arc<dyn Memory>>,
}

impl StepContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Context sharing this memory with a child cancellation token
    ///
    /// Cancelling the parent cancels the child, not the other way round.
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            memory: self.memory.clone(),
        }
    }

    pub fn memory(&self) -> Option<&Arc<dyn Memory>> {
        self.memory.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("has_memory", &self.memory.is_some())
            .finish()
    }
}

/// Partial outputs of a streaming step
pub type StepStream = BoxStream<'static, Result<Value, StepError>>;

/// An async function from JSON input to JSON output
///
/// Graph nodes, chain links, and whole graphs or chains are all steps, so
/// they nest freely.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name used in error messages and tracing spans
    fn name(&self) -> &str {
        "step"
    }

    async fn invoke(&self, ctx: &StepContext, input: Value) -> Result<Value, StepError>;

    /// Produce the output as a stream of partial values
    ///
    /// Steps that cannot stream yield their whole output as a single item.
    async fn stream(&self, ctx: &StepContext, input: Value) -> Result<StepStream, StepError> {
        let output = self.invoke(ctx, input).await?;
        Ok(stream::once(async move { Ok(output) }).boxed())
    }
}

#[async_trait]
impl<S: Step + ?Sized> Step for Arc<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn invoke(&self, ctx: &StepContext, input: Value) -> Result<Value, StepError> {
        (**self).invoke(ctx, input).await
    }

    async fn stream(&self, ctx: &StepContext, input: Value) -> Result<StepStream, StepError> {
        (**self).stream(ctx, input).await
    }
}

/// Helpers available on every step
#[async_trait]
pub trait StepExt: Step {
    /// Invoke the step once per input, concurrently
    ///
    /// Results keep the order of `inputs`; a failing item does not affect the
    /// others.
    async fn batch(&self, ctx: &StepContext, inputs: Vec<Value>) -> Vec<Result<Value, StepError>> {
        let calls = inputs.into_iter().enumerate().map(|(index, input)| async move {
            self.invoke(ctx, input).await.map_err(|err| match err {
                StepError::Failed(message) => {
                    StepError::Failed(format!("error processing batch item {index}: {message}"))
                }
                other => other,
            })
        });
        futures::future::join_all(calls).await
    }

    /// Run this step as a workflow activity
    ///
    /// The activity's cancellation token becomes the step's.
    fn into_activity(self, name: impl Into<String>) -> Activity
    where
        Self: Sized + 'static,
    {
        let step = Arc::new(self);
        Activity::new(name, move |ctx, input| {
            let step = step.clone();
            async move {
                let step_ctx = StepContext::new().with_cancellation(ctx.cancellation_token().clone());
                step.invoke(&step_ctx, input).await.map_err(ActivityError::from)
            }
        })
    }
}

impl<S: Step + ?Sized> StepExt for S {}

type StepBody = dyn Fn(StepContext, Value) -> BoxFuture<'static, Result<Value, StepError>> + Send + Sync;

/// A step backed by a closure
#[derive(Clone)]
pub struct FnStep {
    name: Arc<str>,
    body: Arc<StepBody>,
}

impl FnStep {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            body: Arc::new(move |ctx, input| f(ctx, input).boxed()),
        }
    }
}

#[async_trait]
impl Step for FnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &StepContext, input: Value) -> Result<Value, StepError> {
        // A panicking closure fails the step instead of tearing down the scheduler
        match AssertUnwindSafe((self.body)(ctx.clone(), input)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(StepError::failed(format!("step {} panicked", self.name))),
        }
    }
}

impl fmt::Debug for FnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnStep").field("name", &self.name).finish()
    }
}

/// Shorthand for [`FnStep::new`]
pub fn step_fn<F, Fut>(name: impl Into<String>, f: F) -> FnStep
where
    F: Fn(StepContext, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, StepError>> + Send + 'static,
{
    FnStep::new(name, f)
}

type StreamBody = dyn Fn(StepContext, Value) -> StepStream + Send + Sync;

/// A step backed by a closure that yields partial outputs
///
/// Invoking it drains the stream and returns the last item, or `null` for
/// an empty stream.
#[derive(Clone)]
pub struct StreamFnStep {
    name: Arc<str>,
    body: Arc<StreamBody>,
}

impl StreamFnStep {
    pub fn new<F, S>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext, Value) -> S + Send + Sync + 'static,
        S: Stream<Item = Result<Value, StepError>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            body: Arc::new(move |ctx, input| f(ctx, input).boxed()),
        }
    }
}

#[async_trait]
impl Step for StreamFnStep {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &StepContext, input: Value) -> Result<Value, StepError> {
        (self.body)(ctx.clone(), input)
            .try_fold(Value::Null, |_, item| async move { Ok(item) })
            .await
    }

    async fn stream(&self, ctx: &StepContext, input: Value) -> Result<StepStream, StepError> {
        Ok((self.body)(ctx.clone(), input))
    }
}

impl fmt::Debug for StreamFnStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFnStep").field("name", &self.name).finish()
    }
}

/// Shorthand for [`StreamFnStep::new`]
pub fn stream_fn<F, S>(name: impl Into<String>, f: F) -> StreamFnStep
where
    F: Fn(StepContext, Value) -> S + Send + Sync + 'static,
    S: Stream<Item = Result<Value, StepError>> + Send + 'static,
{
    StreamFnStep::new(name, f)
}

/// A step that runs an activity body directly, outside any executor
pub struct ActivityStep {
    activity: Activity,
}

impl ActivityStep {
    pub fn new(activity: Activity) -> Self {
        Self { activity }
    }
}

#[async_trait]
impl Step for ActivityStep {
    fn name(&self) -> &str {
        self.activity.name()
    }

    async fn invoke(&self, ctx: &StepContext, input: Value) -> Result<Value, StepError> {
        let activity_ctx = weft_durable::ActivityContext::new(
            "",
            self.activity.name(),
            1,
            1,
            ctx.cancellation_token().clone(),
        );
        Ok(self.activity.call(activity_ctx, input).await?)
    }
}

impl fmt::Debug for ActivityStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActivityStep").field("activity", &self.activity.name()).finish()
    }
}
