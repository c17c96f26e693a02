//! Seams to the external decision makers
//!
//! The proposer invents configurations and the oracle judges the tree. Both
//! are opaque: the core only relies on the shapes defined here.

use crate::error::Result;
use crate::insights::{Insight, InsightDecision};
use crate::models::{BenchmarkResult, UsageStats};
use crate::options::{BenchOptionsDelta, ConfigDelta};
use crate::search::{NodeDigest, NodeId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A proposed configuration relative to its parent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChildProposal {
    #[serde(default)]
    pub option_deltas: Vec<ConfigDelta>,
    #[serde(default)]
    pub bench_delta: Option<BenchOptionsDelta>,
    #[serde(default)]
    pub reasoning: String,
}

/// Input for expanding a leaf of the search tree
#[derive(Debug, Clone, Serialize)]
pub struct ExpansionContext {
    pub node_id: NodeId,
    pub options: String,
    pub bench_args: Vec<String>,
    pub result: Option<BenchmarkResult>,
    pub children_required: usize,
    pub insights: Vec<Insight>,
}

/// Input for a full replacement configuration after a regression
#[derive(Debug, Clone, Serialize)]
pub struct ReconfigContext {
    pub options: String,
    pub bench_args: Vec<String>,
    pub usage: UsageStats,
    pub current_throughput: f64,
    pub baseline_throughput: f64,
    pub trace_summary: Option<String>,
    pub retry: u32,
}

/// Input for a partial update pushed to a running benchmark
#[derive(Debug, Clone, Serialize)]
pub struct LivePatchContext {
    pub options: String,
    pub bench_args: Vec<String>,
    /// Usage over the last sample interval
    pub usage: UsageStats,
    pub current_throughput: f64,
    pub baseline_throughput: f64,
    pub recent_trace: Option<String>,
}

/// Input for repairing a configuration the benchmark rejected
#[derive(Debug, Clone, Serialize)]
pub struct CorrectionContext {
    pub options: String,
    pub bench_args: Vec<String>,
    pub reasoning: String,
    pub error: String,
    /// 1-based; later attempts may relax more aggressively
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub node_id: NodeId,
    pub reasoning: String,
}

#[async_trait]
pub trait Proposer: Send + Sync {
    /// Children for a leaf; must return exactly `ctx.children_required`
    async fn propose_children(&self, ctx: &ExpansionContext) -> Result<Vec<ChildProposal>>;

    /// Complete options text replacing the running configuration
    async fn propose_full_reconfig(&self, ctx: &ReconfigContext) -> Result<String>;

    /// `key = value` text for the live channel
    async fn propose_live_patch(&self, ctx: &LivePatchContext) -> Result<String>;

    /// Deltas that repair the rejected configuration
    async fn correct_config(&self, ctx: &CorrectionContext) -> Result<ChildProposal>;
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Pick the next node to explore from level-ordered digests
    async fn select_next(&self, tree_json: &str) -> Result<Selection>;

    async fn collect_insights(&self, records: &[NodeDigest]) -> Result<Vec<Insight>>;

    async fn reflect(&self, records: &[NodeDigest], insights: &[Insight]) -> Result<Vec<InsightDecision>>;
}
