use super::digest::NodeDigest;
use super::node::{ordinal, NodeId, SearchNode};
use crate::error::Result;
use crate::models::BenchmarkResult;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Arena-backed search tree
///
/// Node ids are handed out by the tree from a monotonic counter and double
/// as arena indices. Nodes are never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchTree {
    task_name: String,
    nodes: Vec<SearchNode>,
}

impl SearchTree {
    /// Start a tree whose root is `root`
    pub fn new(mut root: SearchNode, task_name: impl Into<String>) -> Self {
        root.id = NodeId(0);
        root.parent = None;
        root.children.clear();
        Self {
            task_name: task_name.into(),
            nodes: vec![root],
        }
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: NodeId) -> Option<&SearchNode> {
        self.nodes.get(usize::try_from(id.0).ok()?)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut SearchNode> {
        self.nodes.get_mut(usize::try_from(id.0).ok()?)
    }

    /// Attach `node` under `parent` and return its new id
    ///
    /// Returns `None` if `parent` is not in the tree.
    pub fn add_child(&mut self, parent: NodeId, mut node: SearchNode) -> Option<NodeId> {
        self.get(parent)?;

        let id = NodeId(self.nodes.len() as u64);
        node.id = id;
        node.parent = Some(parent);
        node.children.clear();
        self.nodes.push(node);
        self.get_mut(parent)?.children.push(id);

        debug!(node_id = %id, parent_id = %parent, "Added search node");
        Some(id)
    }

    /// True when the node exists and has no children
    pub fn is_leaf(&self, id: NodeId) -> bool {
        self.get(id).is_some_and(SearchNode::is_leaf)
    }

    /// Depth-first lookup from the root
    pub fn find_by_id(&self, target: NodeId) -> Option<&SearchNode> {
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            let node = self.get(id)?;
            if node.id == target {
                return Some(node);
            }
            stack.extend(node.children.iter().rev());
        }
        None
    }

    /// Increment the visit count; returns false for an unknown id
    pub fn visit(&mut self, id: NodeId) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                node.visits += 1;
                true
            }
            None => false,
        }
    }

    pub fn record_result(&mut self, id: NodeId, result: BenchmarkResult) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                node.result = Some(result);
                true
            }
            None => false,
        }
    }

    pub fn set_options_path(&mut self, id: NodeId, path: PathBuf) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                node.options_path = Some(path);
                true
            }
            None => false,
        }
    }

    /// Append a branching justification, numbered by its position
    pub fn add_branch_reason(&mut self, id: NodeId, reason: &str) -> bool {
        match self.get_mut(id) {
            Some(node) => {
                let label = ordinal(node.branch_reasons.len() + 1);
                node.branch_reasons
                    .push(format!("{label} branching reason:\n{reason}"));
                true
            }
            None => false,
        }
    }

    /// Node ids in level order
    pub fn bfs_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::from([self.root()]);
        while let Some(id) = queue.pop_front() {
            if let Some(node) = self.get(id) {
                order.push(id);
                queue.extend(node.children.iter().copied());
            }
        }
        order
    }

    /// Node ids in pre-order
    pub fn dfs_order(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root()];
        while let Some(id) = stack.pop() {
            if let Some(node) = self.get(id) {
                order.push(id);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        order
    }

    /// Brief digests of every node in level order
    pub fn bfs_digests(&self) -> Vec<NodeDigest> {
        self.bfs_order()
            .into_iter()
            .filter_map(|id| self.get(id))
            .map(|node| NodeDigest::brief(node, &self.task_name))
            .collect()
    }

    pub fn bfs_digests_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.bfs_digests())?)
    }

    /// Full digests in pre-order, one per node
    pub fn records(&self) -> Vec<NodeDigest> {
        self.dfs_order()
            .into_iter()
            .filter_map(|id| self.get(id))
            .map(|node| NodeDigest::full(node, &self.task_name))
            .collect()
    }

    /// Append every node as one JSON line; the file is created if missing
    ///
    /// Each call appends the whole tree again.
    pub fn append_record_log(&self, path: &Path) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;

        let mut buf = Vec::new();
        for record in self.records() {
            serde_json::to_writer(&mut buf, &record)?;
            buf.push(b'\n');
        }
        file.write_all(&buf)?;
        Ok(())
    }

    /// Write the whole tree as pretty JSON, replacing any previous dump
    pub fn write_dump(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load_dump(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Node with the highest successful throughput
    pub fn best_node(&self) -> Option<&SearchNode> {
        self.nodes
            .iter()
            .filter_map(|n| n.ops_per_sec().map(|ops| (n, ops)))
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(n, _)| n)
    }
}
