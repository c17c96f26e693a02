use crate::models::BenchmarkResult;
use crate::options::{BenchOptionsDelta, ConfigDelta};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identifier of a node, unique within its tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// One configuration state in the search tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchNode {
    pub(super) id: NodeId,
    pub(super) parent: Option<NodeId>,
    pub(super) children: Vec<NodeId>,
    pub(super) visits: u32,
    pub(super) result: Option<BenchmarkResult>,
    pub(super) branch_reasons: Vec<String>,

    /// Full options-file text
    pub options: String,
    /// Changes from the parent; `None` when the proposal carried none
    pub option_deltas: Option<Vec<ConfigDelta>>,
    /// Full benchmark argument list
    pub bench_args: Vec<String>,
    pub bench_delta: Option<BenchOptionsDelta>,
    pub reasoning: String,
    /// Where the options file was written for the last run
    pub options_path: Option<PathBuf>,
}

impl SearchNode {
    pub fn new(options: impl Into<String>, bench_args: Vec<String>, reasoning: impl Into<String>) -> Self {
        Self {
            id: NodeId(0),
            parent: None,
            children: Vec::new(),
            visits: 0,
            result: None,
            branch_reasons: Vec::new(),
            options: options.into(),
            option_deltas: None,
            bench_args,
            bench_delta: None,
            reasoning: reasoning.into(),
            options_path: None,
        }
    }

    pub fn with_option_deltas(mut self, deltas: Vec<ConfigDelta>) -> Self {
        self.option_deltas = Some(deltas);
        self
    }

    pub fn with_bench_delta(mut self, delta: BenchOptionsDelta) -> Self {
        self.bench_delta = Some(delta);
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn visits(&self) -> u32 {
        self.visits
    }

    pub fn result(&self) -> Option<&BenchmarkResult> {
        self.result.as_ref()
    }

    pub fn branch_reasons(&self) -> &[String] {
        &self.branch_reasons
    }

    /// Throughput of the last successful run
    pub fn ops_per_sec(&self) -> Option<f64> {
        self.result
            .as_ref()
            .filter(|r| r.error.is_none())
            .and_then(|r| r.ops_per_sec)
    }
}

/// English ordinal for `n`: 1st, 2nd, 3rd, 4th, 11th, 21st...
pub(super) fn ordinal(n: usize) -> String {
    let suffix = match (n % 10, n % 100) {
        (_, 11..=13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{n}{suffix}")
}
