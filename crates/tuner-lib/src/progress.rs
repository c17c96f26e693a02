//! Live view of the search for status endpoints

use crate::search::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Where the orchestration currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Starting,
    Expanding,
    Evaluating,
    Selecting,
    Reflecting,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub phase: Phase,
    pub iteration: usize,
    pub total_iterations: usize,
    pub frontier: Option<NodeId>,
    pub evaluating: Option<NodeId>,
    pub best_node: Option<NodeId>,
    pub best_ops_per_sec: Option<f64>,
    pub nodes: usize,
    pub contract_violations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub updated_timestamp: i64,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Starting,
            iteration: 0,
            total_iterations: 0,
            frontier: None,
            evaluating: None,
            best_node: None,
            best_ops_per_sec: None,
            nodes: 0,
            contract_violations: 0,
            message: None,
            updated_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Shared, cheaply clonable progress state
#[derive(Debug, Clone, Default)]
pub struct ProgressBoard {
    inner: Arc<RwLock<ProgressSnapshot>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `f` to the current state and stamp the update time
    pub async fn update(&self, f: impl FnOnce(&mut ProgressSnapshot)) {
        let mut state = self.inner.write().await;
        f(&mut state);
        state.updated_timestamp = chrono::Utc::now().timestamp();
    }

    pub async fn set_phase(&self, phase: Phase) {
        self.update(|s| s.phase = phase).await;
    }

    pub async fn snapshot(&self) -> ProgressSnapshot {
        self.inner.read().await.clone()
    }

    /// False once the search has failed
    pub async fn is_healthy(&self) -> bool {
        self.inner.read().await.phase != Phase::Failed
    }
}
