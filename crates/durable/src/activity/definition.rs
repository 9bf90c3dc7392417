//! Activity definitions

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use super::ActivityContext;

/// Error type for activity failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityError {
    /// Error message
    pub message: String,

    /// Error type/code for programmatic handling
    pub error_type: Option<String>,

    /// Whether this error is retryable
    ///
    /// Non-retryable errors fail the activity immediately, whatever the
    /// retry policy says.
    pub retryable: bool,

    /// Additional error details (for debugging)
    pub details: Option<Value>,
}

impl ActivityError {
    /// Create a new retryable error
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: true,
            details: None,
        }
    }

    /// Create a non-retryable error
    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            retryable: false,
            details: None,
        }
    }

    pub fn with_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for ActivityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActivityError {}

impl From<anyhow::Error> for ActivityError {
    fn from(err: anyhow::Error) -> Self {
        Self::retryable(err.to_string())
    }
}

impl From<serde_json::Error> for ActivityError {
    fn from(err: serde_json::Error) -> Self {
        Self::non_retryable(err.to_string()).with_type("SERIALIZATION")
    }
}

type ActivityBody =
    dyn Fn(ActivityContext, Value) -> BoxFuture<'static, Result<Value, ActivityError>> + Send + Sync;

/// A unit of work invoked from a workflow
///
/// Activities are opaque to the orchestration layer: a name (used for
/// tracing and by durable engines to label history entries) and an async
/// function from JSON input to JSON output. Cloning is cheap.
///
/// # Example
///
/// ```
/// use weft_durable::Activity;
/// use serde_json::json;
///
/// let greet = Activity::new("greet", |_ctx, input| async move {
///     Ok(json!(format!("hello {}", input.as_str().unwrap_or("world"))))
/// });
/// assert_eq!(greet.name(), "greet");
/// ```
#[derive(Clone)]
pub struct Activity {
    name: Arc<str>,
    body: Arc<ActivityBody>,
}

impl Activity {
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ActivityContext, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            body: Arc::new(move |ctx, input| f(ctx, input).boxed()),
        }
    }

    /// Wrap a strongly typed activity
    ///
    /// Input is deserialized before the call and the output serialized after;
    /// a malformed input is a non-retryable failure.
    pub fn typed<A: TypedActivity>(activity: A) -> Self {
        let activity = Arc::new(activity);
        Self::new(A::TYPE, move |ctx, input| {
            let activity = activity.clone();
            async move {
                let input: A::Input = serde_json::from_value(input)?;
                let output = activity.execute(&ctx, input).await?;
                Ok::<_, ActivityError>(serde_json::to_value(output)?)
            }
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the activity body once
    pub fn call(&self, ctx: ActivityContext, input: Value) -> BoxFuture<'static, Result<Value, ActivityError>> {
        (self.body)(ctx, input)
    }
}

impl fmt::Debug for Activity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activity").field("name", &self.name).finish()
    }
}

/// A strongly typed activity
///
/// # Example
///
/// ```ignore
/// use weft_durable::prelude::*;
///
/// struct SendEmailActivity;
///
/// #[async_trait]
/// impl TypedActivity for SendEmailActivity {
///     const TYPE: &'static str = "send_email";
///     type Input = SendEmailInput;
///     type Output = SendEmailOutput;
///
///     async fn execute(
///         &self,
///         ctx: &ActivityContext,
///         input: Self::Input,
///     ) -> Result<Self::Output, ActivityError> {
///         Ok(SendEmailOutput { message_id: "...".into() })
///     }
/// }
///
/// let activity = Activity::typed(SendEmailActivity);
/// ```
#[async_trait]
pub trait TypedActivity: Send + Sync + 'static {
    /// Unique type identifier, used as the activity name
    const TYPE: &'static str;

    type Input: Serialize + DeserializeOwned + Send;

    type Output: Serialize + DeserializeOwned + Send;

    /// Execute the activity
    ///
    /// Return `ActivityError::retryable()` for transient failures and
    /// `ActivityError::non_retryable()` for permanent ones.
    async fn execute(
        &self,
        ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct AddInput {
        a: i64,
        b: i64,
    }

    struct AddActivity;

    #[async_trait]
    impl TypedActivity for AddActivity {
        const TYPE: &'static str = "add";
        type Input = AddInput;
        type Output = i64;

        async fn execute(&self, _ctx: &ActivityContext, input: AddInput) -> Result<i64, ActivityError> {
            Ok(input.a + input.b)
        }
    }

    #[test]
    fn test_activity_error_retryable() {
        let error = ActivityError::retryable("timeout");
        assert!(error.retryable);
        assert_eq!(error.to_string(), "timeout");
    }

    #[test]
    fn test_activity_error_non_retryable() {
        let error = ActivityError::non_retryable("invalid input").with_type("INVALID");
        assert!(!error.retryable);
        assert_eq!(error.error_type.as_deref(), Some("INVALID"));
    }

    #[test]
    fn test_activity_error_from_anyhow_is_retryable() {
        let error: ActivityError = anyhow::anyhow!("connection reset").into();
        assert!(error.retryable);
        assert_eq!(error.message, "connection reset");
    }

    #[tokio::test]
    async fn test_closure_activity() {
        let activity = Activity::new("echo", |_ctx, input| async move { Ok(input) });

        let result = activity
            .call(ActivityContext::detached("wf", "echo-1"), json!("ping"))
            .await
            .unwrap();

        assert_eq!(activity.name(), "echo");
        assert_eq!(result, json!("ping"));
    }

    #[tokio::test]
    async fn test_typed_activity() {
        let activity = Activity::typed(AddActivity);
        assert_eq!(activity.name(), "add");

        let result = activity
            .call(ActivityContext::detached("wf", "add-1"), json!({"a": 2, "b": 3}))
            .await
            .unwrap();
        assert_eq!(result, json!(5));
    }

    #[tokio::test]
    async fn test_typed_activity_rejects_malformed_input() {
        let activity = Activity::typed(AddActivity);

        let error = activity
            .call(ActivityContext::detached("wf", "add-1"), json!({"a": "two"}))
            .await
            .unwrap_err();

        assert!(!error.retryable);
        assert_eq!(error.error_type.as_deref(), Some("SERIALIZATION"));
    }
}
