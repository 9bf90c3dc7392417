//! Directed acyclic graphs of steps
//!
//! Nodes live in a petgraph `DiGraph` with a name→index map for lookups.
//! Cycles are rejected when the closing edge is added, so a built graph is
//! always a DAG and can be scheduled without further checks.
//!
//! ```text
//!   fetch ──► parse ──► store
//!     │                  ▲
//!     └────► audit ──────┘      store receives {"audit": .., "parse": ..}
//! ```

mod error;
mod scheduler;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction::{Incoming, Outgoing};

pub use error::{GraphError, NodeFailure};
pub use scheduler::GraphOutcome;

use crate::metrics::OrchestrationMetrics;
use crate::step::Step;

pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Scheduling limits for a graph run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Upper bound on nodes running at the same time (at least 1)
    pub max_concurrency: usize,

    /// Limit for the whole run; `None` means unbounded
    pub timeout: Option<Duration>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            timeout: None,
        }
    }
}

impl GraphConfig {
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = max_concurrency.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

struct Node {
    name: String,
    step: Arc<dyn Step>,
}

/// A DAG of named steps
///
/// A node runs once every predecessor has completed. Nodes without
/// predecessors receive the graph input, nodes with one predecessor receive
/// its output, and nodes with several receive an object keyed by
/// predecessor name.
pub struct Graph {
    name: String,
    config: GraphConfig,
    dag: DiGraph<Node, ()>,
    index: HashMap<String, NodeIndex>,
    entry_points: Vec<NodeIndex>,
    finish_points: Vec<NodeIndex>,
    metrics: Option<Arc<OrchestrationMetrics>>,
}

impl Graph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: GraphConfig::default(),
            dag: DiGraph::new(),
            index: HashMap::new(),
            entry_points: Vec::new(),
            finish_points: Vec::new(),
            metrics: None,
        }
    }

    pub fn with_config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    /// Record every run in `metrics`
    pub fn with_metrics(mut self, metrics: Arc<OrchestrationMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.dag.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.dag.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn add_node(&mut self, name: impl Into<String>, step: impl Step + 'static) -> Result<(), GraphError> {
        let name = name.into();
        if self.index.contains_key(&name) {
            return Err(GraphError::DuplicateNode(name));
        }
        let idx = self.dag.add_node(Node {
            name: name.clone(),
            step: Arc::new(step),
        });
        self.index.insert(name, idx);
        Ok(())
    }

    /// Declare that `to` depends on `from`
    ///
    /// Adding an edge that already exists is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), GraphError> {
        let source = *self
            .index
            .get(from)
            .ok_or_else(|| GraphError::UnknownSource(from.to_string()))?;
        let target = *self
            .index
            .get(to)
            .ok_or_else(|| GraphError::UnknownTarget(to.to_string()))?;

        if self.dag.contains_edge(source, target) {
            return Ok(());
        }
        // has_path_connecting treats a node as reaching itself
        if has_path_connecting(&self.dag, target, source, None) {
            return Err(GraphError::Cycle {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        self.dag.add_edge(source, target, ());
        Ok(())
    }

    /// Replace the entry points; fails without changes on an unknown name
    pub fn set_entry_points<I, S>(&mut self, names: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.entry_points = self.resolve(names, GraphError::UnknownEntryPoint)?;
        Ok(())
    }

    /// Replace the finish points; fails without changes on an unknown name
    pub fn set_finish_points<I, S>(&mut self, names: I) -> Result<(), GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.finish_points = self.resolve(names, GraphError::UnknownFinishPoint)?;
        Ok(())
    }

    /// Entry points in effect: the declared ones, else every root
    pub fn entry_points(&self) -> Vec<&str> {
        self.names(&self.effective_entry_points())
    }

    /// Finish points in effect: the declared ones, else every sink
    pub fn finish_points(&self) -> Vec<&str> {
        self.names(&self.effective_finish_points())
    }

    /// Direct dependencies of `name`, in insertion order
    pub fn predecessors(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&idx) => self.names(&self.predecessor_indices(idx)),
            None => Vec::new(),
        }
    }

    /// Direct dependents of `name`, in insertion order
    pub fn successors(&self, name: &str) -> Vec<&str> {
        match self.index.get(name) {
            Some(&idx) => self.names(&self.successor_indices(idx)),
            None => Vec::new(),
        }
    }

    /// Nodes grouped into waves that could run together
    ///
    /// Wave 0 holds the nodes without predecessors; every other node sits one
    /// wave after its deepest predecessor.
    pub fn layers(&self) -> Result<Vec<Vec<String>>, GraphError> {
        self.validate()?;

        let depth = self.depths()?;
        let max_depth = depth.iter().copied().max().unwrap_or(0);
        let mut layers = vec![Vec::new(); max_depth + 1];
        for idx in self.dag.node_indices() {
            layers[depth[idx.index()]].push(self.dag[idx].name.clone());
        }
        Ok(layers)
    }

    /// Check that the graph can run: non-empty, every node reachable from
    /// an entry point
    pub fn validate(&self) -> Result<(), GraphError> {
        if self.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut reached = vec![false; self.dag.node_count()];
        let mut dfs = Dfs::empty(&self.dag);
        for start in self.effective_entry_points() {
            dfs.move_to(start);
            while let Some(idx) = dfs.next(&self.dag) {
                reached[idx.index()] = true;
            }
        }

        match self.dag.node_indices().find(|idx| !reached[idx.index()]) {
            Some(idx) => Err(GraphError::Unreachable(self.dag[idx].name.clone())),
            None => Ok(()),
        }
    }

    fn resolve<I, S>(&self, names: I, unknown: fn(String) -> GraphError) -> Result<Vec<NodeIndex>, GraphError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut resolved = Vec::new();
        for name in names {
            let name = name.as_ref();
            let idx = *self
                .index
                .get(name)
                .ok_or_else(|| unknown(name.to_string()))?;
            if !resolved.contains(&idx) {
                resolved.push(idx);
            }
        }
        Ok(resolved)
    }

    fn effective_entry_points(&self) -> Vec<NodeIndex> {
        if !self.entry_points.is_empty() {
            return self.entry_points.clone();
        }
        self.dag.externals(Incoming).collect()
    }

    fn effective_finish_points(&self) -> Vec<NodeIndex> {
        if !self.finish_points.is_empty() {
            return self.finish_points.clone();
        }
        self.dag.externals(Outgoing).collect()
    }

    fn names(&self, indices: &[NodeIndex]) -> Vec<&str> {
        indices.iter().map(|&idx| self.dag[idx].name.as_str()).collect()
    }

    // petgraph walks adjacency newest-first; sort back to insertion order
    fn predecessor_indices(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut preds: Vec<_> = self.dag.neighbors_directed(idx, Incoming).collect();
        preds.sort();
        preds
    }

    fn successor_indices(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut succs: Vec<_> = self.dag.neighbors_directed(idx, Outgoing).collect();
        succs.sort();
        succs
    }

    /// Longest distance from a root, per node index
    fn depths(&self) -> Result<Vec<usize>, GraphError> {
        let sorted = toposort(&self.dag, None).map_err(|cycle| {
            let name = self.dag[cycle.node_id()].name.clone();
            GraphError::Cycle {
                from: name.clone(),
                to: name,
            }
        })?;

        let mut depth = vec![0usize; self.dag.node_count()];
        for idx in sorted {
            depth[idx.index()] = self
                .dag
                .neighbors_directed(idx, Incoming)
                .map(|pred| depth[pred.index()] + 1)
                .max()
                .unwrap_or(0);
        }
        Ok(depth)
    }

    /// Topological order that is stable across runs: by depth, then by
    /// insertion
    fn topological_order(&self) -> Result<Vec<NodeIndex>, GraphError> {
        let depth = self.depths()?;
        let mut order: Vec<NodeIndex> = self.dag.node_indices().collect();
        order.sort_by_key(|idx| (depth[idx.index()], *idx));
        Ok(order)
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("nodes", &self.dag.node_weights().map(|node| node.name.as_str()).collect::<Vec<_>>())
            .field("edges", &self.dag.edge_count())
            .finish()
    }
}
