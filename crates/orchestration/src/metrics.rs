//! Execution counters for chains, graphs and workflows
//!
//! One [`OrchestrationMetrics`] is shared (behind an `Arc`) by every chain,
//! graph or workflow it is attached to. Counters are atomics; [`snapshot`]
//! reads them without locking, so its fields may be a few updates apart.
//!
//! [`snapshot`]: OrchestrationMetrics::snapshot

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use weft_durable::WorkflowFn;

/// What kind of composition an execution belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionKind {
    Chain,
    Graph,
    Workflow,
}

impl fmt::Display for ExecutionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Chain => write!(f, "chain"),
            Self::Graph => write!(f, "graph"),
            Self::Workflow => write!(f, "workflow"),
        }
    }
}

#[derive(Debug, Default)]
struct KindCounters {
    executions: AtomicU64,
    errors: AtomicU64,
    active: AtomicI64,
    total_micros: AtomicU64,
    max_micros: AtomicU64,
}

impl KindCounters {
    fn record(&self, duration: Duration, success: bool) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.executions.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.total_micros.fetch_add(micros, Ordering::Relaxed);
        self.max_micros.fetch_max(micros, Ordering::Relaxed);
    }

    fn snapshot(&self) -> KindSnapshot {
        let executions = self.executions.load(Ordering::Relaxed);
        let total = self.total_micros.load(Ordering::Relaxed);
        KindSnapshot {
            executions,
            errors: self.errors.load(Ordering::Relaxed),
            active: self.active.load(Ordering::Relaxed),
            mean_duration: Duration::from_micros(total.checked_div(executions).unwrap_or(0)),
            max_duration: Duration::from_micros(self.max_micros.load(Ordering::Relaxed)),
        }
    }
}

/// Counters for one [`ExecutionKind`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindSnapshot {
    pub executions: u64,
    pub errors: u64,
    /// Executions started and not yet finished
    pub active: i64,
    pub mean_duration: Duration,
    pub max_duration: Duration,
}

/// Point-in-time view of [`OrchestrationMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub chains: KindSnapshot,
    pub graphs: KindSnapshot,
    pub workflows: KindSnapshot,
    /// Sum of node counts over all recorded graph runs
    pub graph_nodes: u64,
}

impl MetricsSnapshot {
    pub fn total_executions(&self) -> u64 {
        self.chains.executions + self.graphs.executions + self.workflows.executions
    }

    pub fn total_errors(&self) -> u64 {
        self.chains.errors + self.graphs.errors + self.workflows.errors
    }
}

/// Execution, error, duration and in-flight counters
#[derive(Debug, Default)]
pub struct OrchestrationMetrics {
    chains: KindCounters,
    graphs: KindCounters,
    workflows: KindCounters,
    graph_nodes: AtomicU64,
}

impl OrchestrationMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn counters(&self, kind: ExecutionKind) -> &KindCounters {
        match kind {
            ExecutionKind::Chain => &self.chains,
            ExecutionKind::Graph => &self.graphs,
            ExecutionKind::Workflow => &self.workflows,
        }
    }

    /// Mark an execution as active until the returned timer finishes
    ///
    /// A timer dropped without [`finish`](ExecutionTimer::finish) counts as
    /// a failed execution, which covers futures dropped by a timeout or
    /// cancellation.
    pub fn start(&self, kind: ExecutionKind, name: &str) -> ExecutionTimer<'_> {
        self.counters(kind).active.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(%kind, name, "execution started");
        ExecutionTimer {
            metrics: self,
            kind,
            name: name.to_string(),
            started: Instant::now(),
            finished: false,
        }
    }

    /// Record a finished execution that was not tracked with a timer
    pub fn record(&self, kind: ExecutionKind, duration: Duration, success: bool) {
        self.counters(kind).record(duration, success);
    }

    pub fn record_graph_nodes(&self, nodes: usize) {
        self.graph_nodes.fetch_add(nodes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chains: self.chains.snapshot(),
            graphs: self.graphs.snapshot(),
            workflows: self.workflows.snapshot(),
            graph_nodes: self.graph_nodes.load(Ordering::Relaxed),
        }
    }

    /// Wrap a workflow so every run of its body is recorded
    ///
    /// Under a replaying engine each replay of the body counts as an
    /// execution.
    pub fn instrument_workflow(self: &Arc<Self>, workflow: WorkflowFn) -> WorkflowFn {
        let metrics = self.clone();
        let name = workflow.name().to_string();
        WorkflowFn::new(name.clone(), move |ctx, input| {
            let metrics = metrics.clone();
            let workflow = workflow.clone();
            let name = name.clone();
            async move {
                let timer = metrics.start(ExecutionKind::Workflow, &name);
                let result = workflow.call(ctx, input).await;
                timer.finish(result.is_ok());
                result
            }
        })
    }
}

/// An in-flight execution; see [`OrchestrationMetrics::start`]
#[must_use = "dropping the timer records a failed execution"]
pub struct ExecutionTimer<'a> {
    metrics: &'a OrchestrationMetrics,
    kind: ExecutionKind,
    name: String,
    started: Instant,
    finished: bool,
}

impl ExecutionTimer<'_> {
    pub fn record_graph_nodes(&self, nodes: usize) {
        self.metrics.record_graph_nodes(nodes);
    }

    pub fn finish(mut self, success: bool) {
        self.complete(success);
    }

    fn complete(&mut self, success: bool) {
        if std::mem::replace(&mut self.finished, true) {
            return;
        }
        let elapsed = self.started.elapsed();
        let counters = self.metrics.counters(self.kind);
        counters.active.fetch_sub(1, Ordering::Relaxed);
        counters.record(elapsed, success);
        tracing::debug!(
            kind = %self.kind,
            name = %self.name,
            success,
            elapsed_ms = elapsed.as_millis() as u64,
            "execution finished"
        );
    }
}

impl Drop for ExecutionTimer<'_> {
    fn drop(&mut self) {
        self.complete(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_of_fresh_metrics_is_zero() {
        let metrics = OrchestrationMetrics::default();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_tracks_active_and_duration() {
        let metrics = OrchestrationMetrics::default();

        let timer = metrics.start(ExecutionKind::Chain, "letters");
        assert_eq!(metrics.snapshot().chains.active, 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        timer.finish(true);

        let chains = metrics.snapshot().chains;
        assert_eq!(chains.active, 0);
        assert_eq!(chains.executions, 1);
        assert_eq!(chains.errors, 0);
        assert_eq!(chains.max_duration, Duration::from_millis(30));
    }

    #[test]
    fn test_dropped_timer_counts_as_error() {
        let metrics = OrchestrationMetrics::default();
        drop(metrics.start(ExecutionKind::Graph, "abandoned"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.graphs.executions, 1);
        assert_eq!(snapshot.graphs.errors, 1);
        assert_eq!(snapshot.graphs.active, 0);
        assert_eq!(snapshot.total_errors(), 1);
    }

    #[test]
    fn test_mean_duration() {
        let metrics = OrchestrationMetrics::default();
        metrics.record(ExecutionKind::Workflow, Duration::from_millis(10), true);
        metrics.record(ExecutionKind::Workflow, Duration::from_millis(30), false);

        let workflows = metrics.snapshot().workflows;
        assert_eq!(workflows.mean_duration, Duration::from_millis(20));
        assert_eq!(workflows.max_duration, Duration::from_millis(30));
        assert_eq!(workflows.errors, 1);
    }
}
