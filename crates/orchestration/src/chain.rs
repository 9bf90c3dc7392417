//! Linear chains of steps
//!
//! Each step's output is the next step's input. A chain is itself a
//! [`Step`], so it can be a graph node or, through
//! [`StepExt::into_activity`](crate::StepExt::into_activity), a workflow
//! activity.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::Instrument;

use crate::memory::Memory;
use crate::metrics::{ExecutionKind, OrchestrationMetrics};
use crate::step::{Step, StepContext, StepError, StepStream};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChainError {
    #[error("chain has no steps")]
    Empty,

    #[error("chain input must be an object when memory is configured")]
    InvalidInput,

    #[error("error in chain step {index} ({name}): {source}")]
    Step {
        index: usize,
        name: String,
        source: StepError,
    },

    #[error("memory error: {0}")]
    Memory(StepError),

    #[error("chain timed out after {0:?}")]
    Timeout(Duration),

    #[error("chain canceled")]
    Canceled,

    #[error("cannot stream an empty chain")]
    EmptyStream,

    #[error("error in chain stream pre-computation: {0}")]
    StreamPrecompute(Box<ChainError>),
}

impl ChainError {
    /// Whether another attempt could succeed
    ///
    /// Bad input and canceled steps fail the same way every time.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidInput
                | Self::Canceled
                | Self::Step {
                    source: StepError::Canceled,
                    ..
                }
        )
    }
}

impl From<ChainError> for StepError {
    fn from(err: ChainError) -> Self {
        match err {
            ChainError::Canceled => StepError::Canceled,
            ChainError::Timeout(limit) => StepError::Timeout(limit),
            other => StepError::Failed(other.to_string()),
        }
    }
}

/// Receives the final error of an invocation; may substitute a value
pub type ErrorHandler = Arc<dyn Fn(ChainError) -> Result<Value, ChainError> + Send + Sync>;

/// Builder for [`Chain`]
#[derive(Default)]
pub struct ChainBuilder {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    memory: Option<Arc<dyn Memory>>,
    timeout: Option<Duration>,
    retries: u32,
    retry_delay: Duration,
    error_handler: Option<ErrorHandler>,
    metrics: Option<Arc<OrchestrationMetrics>>,
}

impl ChainBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn memory(mut self, memory: Arc<dyn Memory>) -> Self {
        self.memory = Some(memory);
        self
    }

    /// Bound the whole invocation, retries and delays included
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Re-run the whole chain up to `retries` more times after a failure
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(ChainError) -> Result<Value, ChainError> + Send + Sync + 'static,
    {
        self.error_handler = Some(Arc::new(handler));
        self
    }

    /// Record every invocation in `metrics`
    pub fn metrics(mut self, metrics: Arc<OrchestrationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Chain, ChainError> {
        if self.steps.is_empty() {
            return Err(ChainError::Empty);
        }
        Ok(Chain {
            name: self.name,
            steps: self.steps,
            memory: self.memory,
            timeout: self.timeout,
            retries: self.retries,
            retry_delay: self.retry_delay,
            error_handler: self.error_handler,
            metrics: self.metrics,
        })
    }
}

/// Steps run one after another
///
/// # Example
///
/// ```
/// use serde_json::json;
/// use weft_orchestration::{step_fn, Chain, StepContext};
///
/// # tokio_test::block_on(async {
/// let chain = Chain::builder("greet")
///     .step(step_fn("upper", |_ctx, input| async move {
///         Ok(json!(input.as_str().unwrap_or_default().to_uppercase()))
///     }))
///     .step(step_fn("exclaim", |_ctx, input| async move {
///         Ok(json!(format!("{}!", input.as_str().unwrap_or_default())))
///     }))
///     .build()
///     .unwrap();
///
/// let output = chain.invoke(&StepContext::new(), json!("hi")).await.unwrap();
/// assert_eq!(output, json!("HI!"));
/// # });
/// ```
pub struct Chain {
    name: String,
    steps: Vec<Arc<dyn Step>>,
    memory: Option<Arc<dyn Memory>>,
    timeout: Option<Duration>,
    retries: u32,
    retry_delay: Duration,
    error_handler: Option<ErrorHandler>,
    metrics: Option<Arc<OrchestrationMetrics>>,
}

impl Chain {
    pub fn builder(name: impl Into<String>) -> ChainBuilder {
        ChainBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn memory(&self) -> Option<&Arc<dyn Memory>> {
        self.memory.as_ref()
    }

    #[tracing::instrument(skip_all, fields(chain = %self.name))]
    pub async fn invoke(&self, ctx: &StepContext, input: Value) -> Result<Value, ChainError> {
        let timer = self
            .metrics
            .as_ref()
            .map(|metrics| metrics.start(ExecutionKind::Chain, &self.name));

        let attempts = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, self.run_with_retries(ctx, input))
                    .await
                    .unwrap_or(Err(ChainError::Timeout(limit))),
                None => self.run_with_retries(ctx, input).await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ChainError::Canceled),
            result = attempts => result,
        };

        let result = match (result, &self.error_handler) {
            (Err(err), Some(handler)) => {
                tracing::debug!(error = %err, "passing chain error to handler");
                handler(err)
            }
            (result, _) => result,
        };

        if let Some(timer) = timer {
            timer.finish(result.is_ok());
        }
        result
    }

    /// Run every step but the last, then stream the last one
    ///
    /// Memory variables are merged into the input as for
    /// [`invoke`](Self::invoke), but nothing is saved back since the final
    /// output is only known to the consumer. Retries, the timeout and the
    /// error handler do not apply.
    #[tracing::instrument(skip_all, fields(chain = %self.name))]
    pub async fn stream(&self, ctx: &StepContext, input: Value) -> Result<StepStream, ChainError> {
        let Some((last, head)) = self.steps.split_last() else {
            return Err(ChainError::EmptyStream);
        };

        let precompute = async {
            let (step_ctx, current) = self.prepare(ctx, input).await?;
            let current = self.run_steps(&step_ctx, head, current).await?;
            Ok::<_, ChainError>((step_ctx, current))
        };
        let (step_ctx, current) = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ChainError::Canceled),
            result = precompute => result,
        }
        .map_err(|err| ChainError::StreamPrecompute(Box::new(err)))?;

        tracing::debug!(step = last.name(), "streaming last chain step");
        last.stream(&step_ctx, current).await.map_err(|source| ChainError::Step {
            index: head.len(),
            name: last.name().to_string(),
            source,
        })
    }

    async fn run_with_retries(&self, ctx: &StepContext, input: Value) -> Result<Value, ChainError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.run_once(ctx, input.clone()).await {
                Ok(output) => return Ok(output),
                Err(err) if attempt <= self.retries && !ctx.is_cancelled() && err.is_retryable() => {
                    tracing::warn!(attempt, error = %err, "chain attempt failed, retrying");
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn run_once(&self, ctx: &StepContext, input: Value) -> Result<Value, ChainError> {
        let (step_ctx, current) = self.prepare(ctx, input.clone()).await?;
        let output = self.run_steps(&step_ctx, &self.steps, current).await?;

        if let Some(memory) = &self.memory {
            memory
                .save_context(&input, &output)
                .await
                .map_err(ChainError::Memory)?;
        }
        Ok(output)
    }

    /// Attach memory to the context and merge its variables into the input
    async fn prepare(&self, ctx: &StepContext, input: Value) -> Result<(StepContext, Value), ChainError> {
        let Some(memory) = &self.memory else {
            return Ok((ctx.clone(), input));
        };

        let Value::Object(mut fields) = input else {
            return Err(ChainError::InvalidInput);
        };
        let variables = memory
            .load_variables(&Value::Object(fields.clone()))
            .await
            .map_err(ChainError::Memory)?;
        // Caller-supplied keys win over memory
        for (key, value) in variables {
            fields.entry(key).or_insert(value);
        }
        Ok((ctx.clone().with_memory(memory.clone()), Value::Object(fields)))
    }

    async fn run_steps(
        &self,
        ctx: &StepContext,
        steps: &[Arc<dyn Step>],
        mut current: Value,
    ) -> Result<Value, ChainError> {
        for (index, step) in steps.iter().enumerate() {
            let span = tracing::debug_span!("chain_step", index, step = step.name());
            current = step
                .invoke(ctx, current)
                .instrument(span)
                .await
                .map_err(|source| ChainError::Step {
                    index,
                    name: step.name().to_string(),
                    source,
                })?;
        }
        Ok(current)
    }
}

#[async_trait]
impl Step for Chain {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &StepContext, input: Value) -> Result<Value, StepError> {
        Ok(Chain::invoke(self, ctx, input).await?)
    }

    async fn stream(&self, ctx: &StepContext, input: Value) -> Result<StepStream, StepError> {
        Ok(Chain::stream(self, ctx, input).await?)
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("name", &self.name)
            .field("steps", &self.steps.iter().map(|step| step.name()).collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("has_memory", &self.memory.is_some())
            .field("has_error_handler", &self.error_handler.is_some())
            .field("has_metrics", &self.metrics.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::step_fn;
    use serde_json::json;

    #[test]
    fn test_empty_chain_rejected() {
        assert_eq!(Chain::builder("empty").build().unwrap_err(), ChainError::Empty);
    }

    #[test]
    fn test_step_error_message_names_step() {
        let err = ChainError::Step {
            index: 1,
            name: "fail".into(),
            source: StepError::failed("boom"),
        };
        assert_eq!(err.to_string(), "error in chain step 1 (fail): boom");
    }

    #[test]
    fn test_canceled_steps_are_not_retryable() {
        let canceled = ChainError::Step {
            index: 0,
            name: "wait".into(),
            source: StepError::Canceled,
        };
        assert!(!canceled.is_retryable());
        assert!(!ChainError::InvalidInput.is_retryable());
        assert!(ChainError::Step {
            index: 0,
            name: "wait".into(),
            source: StepError::failed("boom"),
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_empty_chain_cannot_stream() {
        // The builder rejects empty chains, so assemble one directly
        let chain = Chain {
            name: "empty".into(),
            steps: Vec::new(),
            memory: None,
            timeout: None,
            retries: 0,
            retry_delay: Duration::ZERO,
            error_handler: None,
            metrics: None,
        };

        let err = chain.stream(&StepContext::new(), json!({})).await.err();
        assert_eq!(err, Some(ChainError::EmptyStream));
        assert_eq!(ChainError::EmptyStream.to_string(), "cannot stream an empty chain");
    }

    #[tokio::test]
    async fn test_chain_is_a_step() {
        let chain = Chain::builder("inner")
            .step(step_fn("inc", |_ctx, input| async move {
                Ok(json!(input.as_i64().unwrap_or_default() + 1))
            }))
            .build()
            .unwrap();

        let as_step: &dyn Step = &chain;
        assert_eq!(as_step.name(), "inner");
        assert_eq!(as_step.invoke(&StepContext::new(), json!(1)).await.unwrap(), json!(2));
    }
}
