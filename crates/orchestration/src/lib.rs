//! # Step Composition
//!
//! Graphs and chains of [`Step`]s, runnable directly or as activities of a
//! `weft-durable` workflow.
//!
//! - [`Graph`]: a DAG of named steps scheduled with bounded concurrency; a
//!   failing node skips only what depends on it
//! - [`Chain`]: steps in sequence with shared [`Memory`], a whole-chain
//!   timeout, retries and an error handler
//! - [`StepExt::into_activity`]: turn any step, graph or chain into an
//!   [`Activity`](weft_durable::Activity)
//! - [`Step::stream`]: partial outputs of the last chain step or the single
//!   graph finish node, as they are produced
//! - [`OrchestrationMetrics`]: execution, error, duration and in-flight
//!   counters shared by chains, graphs and workflows
//!
//! ## Example
//!
//! ```
//! use serde_json::json;
//! use weft_orchestration::{step_fn, Graph, StepContext};
//!
//! # tokio_test::block_on(async {
//! let mut graph = Graph::new("pipeline");
//! graph.add_node("fetch", step_fn("fetch", |_ctx, input| async move { Ok(input) })).unwrap();
//! graph.add_node("count", step_fn("count", |_ctx, input| async move {
//!     Ok(json!(input.as_str().map(str::len).unwrap_or_default()))
//! })).unwrap();
//! graph.add_edge("fetch", "count").unwrap();
//!
//! let output = graph.invoke(&StepContext::new(), json!("hello")).await.unwrap();
//! assert_eq!(output, json!(5));
//! # });
//! ```

pub mod chain;
pub mod graph;
pub mod memory;
pub mod metrics;
pub mod step;

pub use chain::{Chain, ChainBuilder, ChainError, ErrorHandler};
pub use graph::{Graph, GraphConfig, GraphError, GraphOutcome, NodeFailure};
pub use memory::{Memory, SharedMemory};
pub use metrics::{ExecutionKind, ExecutionTimer, KindSnapshot, MetricsSnapshot, OrchestrationMetrics};
pub use step::{
    step_fn, stream_fn, ActivityStep, FnStep, Step, StepContext, StepError, StepExt, StepStream, StreamFnStep,
};
