//! Ready-queue execution of a graph over a bounded `JoinSet`

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::{stream, FutureExt, StreamExt};
use petgraph::graph::NodeIndex;
use petgraph::visit::Dfs;
use petgraph::Direction::{Incoming, Outgoing};
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use tracing::Instrument;

use super::{Graph, GraphError, NodeFailure};
use crate::metrics::ExecutionKind;
use crate::step::{Step, StepContext, StepError, StepStream};

#[derive(Debug, Clone)]
enum NodeState {
    Waiting,
    Running,
    Completed(Value),
    Failed(StepError),
    Skipped,
}

/// Result of a graph run that got to the end
///
/// Node failures do not abort the run: independent branches keep going and
/// every failure is collected here in topological order.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphOutcome {
    /// Outputs of the finish points that completed, keyed by node name
    pub outputs: Map<String, Value>,

    pub failures: Vec<NodeFailure>,

    /// Nodes that never ran because something upstream failed
    pub skipped: Vec<String>,

    finish_points: Vec<String>,
}

impl GraphOutcome {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapse into the graph's value
    ///
    /// With a single finish point that is its output; with several it is
    /// the `outputs` object.
    pub fn into_result(mut self) -> Result<Value, GraphError> {
        if !self.failures.is_empty() {
            return Err(GraphError::NodesFailed {
                failures: self.failures,
                outputs: self.outputs,
            });
        }
        match self.finish_points.as_slice() {
            [only] => Ok(self.outputs.remove(only).unwrap_or(Value::Null)),
            _ => Ok(Value::Object(self.outputs)),
        }
    }
}

/// Node states left behind by an execution
struct Execution {
    order: Vec<NodeIndex>,
    states: Vec<NodeState>,
}

impl Graph {
    /// Run the graph and report per-node outcomes
    ///
    /// Errors only for an invalid graph, a timeout, or cancellation; node
    /// failures are reported in the returned [`GraphOutcome`].
    #[tracing::instrument(skip_all, fields(graph = %self.name))]
    pub async fn run(&self, ctx: &StepContext, input: Value) -> Result<GraphOutcome, GraphError> {
        let timer = self
            .metrics
            .as_ref()
            .map(|metrics| metrics.start(ExecutionKind::Graph, &self.name));

        let result = self
            .execute_scoped(ctx, input, None)
            .await
            .map(|execution| self.outcome(execution));

        if let Some(timer) = timer {
            timer.record_graph_nodes(self.len());
            timer.finish(matches!(&result, Ok(outcome) if outcome.is_success()));
        }
        result
    }

    /// Run the graph and return its value
    ///
    /// Any node failure becomes [`GraphError::NodesFailed`].
    pub async fn invoke(&self, ctx: &StepContext, input: Value) -> Result<Value, GraphError> {
        self.run(ctx, input).await?.into_result()
    }

    /// Run the graph and stream its result
    ///
    /// With a single finish point, everything upstream runs first and the
    /// finish node is then streamed, so its partial outputs arrive as they
    /// are produced. With several finish points the combined outputs object
    /// is yielded once.
    #[tracing::instrument(skip_all, fields(graph = %self.name))]
    pub async fn stream(&self, ctx: &StepContext, input: Value) -> Result<StepStream, GraphError> {
        let finish_points = self.effective_finish_points();
        let [exit] = finish_points.as_slice() else {
            if finish_points.is_empty() {
                return Err(GraphError::NoExitNodes);
            }
            let output = self.invoke(ctx, input).await?;
            return Ok(stream::once(async move { Ok(output) }).boxed());
        };
        let exit = *exit;

        let execution = self.execute_scoped(ctx, input.clone(), Some(exit)).await?;
        let failures = self.failures(&execution);
        if !failures.is_empty() {
            return Err(GraphError::NodesFailed {
                failures,
                outputs: Map::new(),
            });
        }

        let node = &self.dag[exit];
        tracing::debug!(node = %node.name, "streaming finish node");
        let node_input = self.node_input(exit, &execution.states, &input);
        node.step.stream(ctx, node_input).await.map_err(|error| {
            GraphError::NodesFailed {
                failures: vec![NodeFailure {
                    node: node.name.clone(),
                    error,
                }],
                outputs: Map::new(),
            }
        })
    }

    /// Execute under a child scope with the configured timeout, honoring
    /// cancellation of `ctx`
    async fn execute_scoped(
        &self,
        ctx: &StepContext,
        input: Value,
        held: Option<NodeIndex>,
    ) -> Result<Execution, GraphError> {
        self.validate()?;

        let scope = ctx.child();
        let execution = async {
            match self.config.timeout {
                Some(limit) => tokio::time::timeout(limit, self.execute(&scope, input, held))
                    .await
                    .unwrap_or(Err(GraphError::Timeout(limit))),
                None => self.execute(&scope, input, held).await,
            }
        };

        let result = tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(GraphError::Canceled),
            result = execution => result,
        };

        // Nodes still in flight observe this through their context
        scope.cancellation_token().cancel();

        if let Err(err) = &result {
            tracing::warn!(error = %err, "graph run aborted");
        }
        result
    }

    /// Schedule every node except `held`, which is left waiting
    async fn execute(
        &self,
        scope: &StepContext,
        input: Value,
        held: Option<NodeIndex>,
    ) -> Result<Execution, GraphError> {
        let order = self.topological_order()?;
        let node_count = self.dag.node_count();
        let mut position = vec![0usize; node_count];
        for (pos, idx) in order.iter().enumerate() {
            position[idx.index()] = pos;
        }

        let mut remaining: Vec<usize> = self
            .dag
            .node_indices()
            .map(|idx| self.dag.neighbors_directed(idx, Incoming).count())
            .collect();
        let mut states = vec![NodeState::Waiting; node_count];
        // Positions in topological order so the earliest ready node starts first
        let mut ready: BTreeSet<usize> = order
            .iter()
            .filter(|idx| remaining[idx.index()] == 0 && Some(**idx) != held)
            .map(|idx| position[idx.index()])
            .collect();

        let max_concurrency = self.config.max_concurrency.max(1);
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < max_concurrency {
                let Some(pos) = ready.pop_first() else { break };
                let idx = order[pos];
                let node_input = self.node_input(idx, &states, &input);
                states[idx.index()] = NodeState::Running;

                let name = self.dag[idx].name.clone();
                let step = self.dag[idx].step.clone();
                let node_ctx = scope.clone();
                let span = tracing::info_span!("graph_node", node = %name);
                tasks.spawn(
                    async move {
                        tracing::debug!("node started");
                        let result = AssertUnwindSafe(step.invoke(&node_ctx, node_input))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|_| Err(StepError::failed(format!("node {name} panicked"))));
                        (idx, result)
                    }
                    .instrument(span),
                );
            }

            let Some(joined) = tasks.join_next().await else { break };
            let (idx, result) = joined.map_err(|_| GraphError::Canceled)?;

            match result {
                Ok(output) => {
                    tracing::debug!(node = %self.dag[idx].name, "node completed");
                    states[idx.index()] = NodeState::Completed(output);
                    for succ in self.dag.neighbors_directed(idx, Outgoing) {
                        remaining[succ.index()] -= 1;
                        if remaining[succ.index()] == 0
                            && matches!(states[succ.index()], NodeState::Waiting)
                            && Some(succ) != held
                        {
                            ready.insert(position[succ.index()]);
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(node = %self.dag[idx].name, error = %error, "node failed");
                    states[idx.index()] = NodeState::Failed(error);
                    self.skip_dependents(idx, &mut states);
                }
            }
        }

        Ok(Execution { order, states })
    }

    fn node_input(&self, idx: NodeIndex, states: &[NodeState], input: &Value) -> Value {
        let output = |pred: NodeIndex| match &states[pred.index()] {
            NodeState::Completed(value) => value.clone(),
            _ => Value::Null,
        };

        match self.predecessor_indices(idx).as_slice() {
            [] => input.clone(),
            [pred] => output(*pred),
            preds => Value::Object(
                preds
                    .iter()
                    .map(|&pred| (self.dag[pred].name.clone(), output(pred)))
                    .collect(),
            ),
        }
    }

    fn skip_dependents(&self, failed: NodeIndex, states: &mut [NodeState]) {
        // Nothing downstream of a failure can have started yet
        let mut dfs = Dfs::new(&self.dag, failed);
        while let Some(idx) = dfs.next(&self.dag) {
            if idx != failed && matches!(states[idx.index()], NodeState::Waiting) {
                states[idx.index()] = NodeState::Skipped;
            }
        }
    }

    fn failures(&self, execution: &Execution) -> Vec<NodeFailure> {
        execution
            .order
            .iter()
            .filter_map(|&idx| match &execution.states[idx.index()] {
                NodeState::Failed(error) => Some(NodeFailure {
                    node: self.dag[idx].name.clone(),
                    error: error.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    fn outcome(&self, execution: Execution) -> GraphOutcome {
        let finish_points = self.effective_finish_points();

        let mut outputs = Map::new();
        for &idx in &finish_points {
            if let NodeState::Completed(value) = &execution.states[idx.index()] {
                outputs.insert(self.dag[idx].name.clone(), value.clone());
            }
        }

        let skipped = execution
            .order
            .iter()
            .filter(|idx| matches!(execution.states[idx.index()], NodeState::Skipped))
            .map(|&idx| self.dag[idx].name.clone())
            .collect();

        GraphOutcome {
            outputs,
            failures: self.failures(&execution),
            skipped,
            finish_points: self.names(&finish_points).into_iter().map(String::from).collect(),
        }
    }
}

#[async_trait]
impl Step for Graph {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, ctx: &StepContext, input: Value) -> Result<Value, StepError> {
        Ok(Graph::invoke(self, ctx, input).await?)
    }

    async fn stream(&self, ctx: &StepContext, input: Value) -> Result<StepStream, StepError> {
        Ok(Graph::stream(self, ctx, input).await?)
    }
}
