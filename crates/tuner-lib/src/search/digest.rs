//! Serializable node summaries handed to the oracle and the record log

use super::node::{NodeId, SearchNode};
use crate::models::BenchmarkResult;
use crate::options::{BenchOptionsDelta, ConfigDelta};
use serde::{Serialize, Serializer};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkContent {
    pub task_name: String,
    pub visit_count: u32,
    pub benchmark_result: Option<BenchmarkResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDigest {
    pub unique_id: NodeId,
    pub parent_id: Option<NodeId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_option: Option<String>,
    #[serde(serialize_with = "or_fail")]
    pub database_option_changes_from_parent: Option<Vec<ConfigDelta>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_benchmark_option: Option<Vec<String>>,
    #[serde(serialize_with = "or_fail")]
    pub database_benchmark_changes_from_parent: Option<BenchOptionsDelta>,
    pub benchmark_content: BenchmarkContent,
    pub reasoning_summary: String,
    pub branch_reasons: Vec<String>,
    pub has_children: bool,
    pub children_count: usize,
}

impl NodeDigest {
    /// Digest without the full option text, used for tree-wide summaries
    pub fn brief(node: &SearchNode, task_name: &str) -> Self {
        Self {
            unique_id: node.id(),
            parent_id: node.parent(),
            database_option: None,
            database_option_changes_from_parent: node.option_deltas.clone(),
            database_benchmark_option: None,
            database_benchmark_changes_from_parent: node.bench_delta.clone(),
            benchmark_content: BenchmarkContent {
                task_name: task_name.to_string(),
                visit_count: node.visits(),
                benchmark_result: node.result().cloned(),
            },
            reasoning_summary: node.reasoning.clone(),
            branch_reasons: node.branch_reasons().to_vec(),
            has_children: !node.is_leaf(),
            children_count: node.children().len(),
        }
    }

    /// Digest including the full options text and argument list
    pub fn full(node: &SearchNode, task_name: &str) -> Self {
        Self {
            database_option: Some(node.options.clone()),
            database_benchmark_option: Some(node.bench_args.clone()),
            ..Self::brief(node, task_name)
        }
    }
}

fn or_fail<S: Serializer, T: Serialize>(value: &Option<T>, s: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(v) => v.serialize(s),
        None => s.serialize_str("FAIL"),
    }
}
