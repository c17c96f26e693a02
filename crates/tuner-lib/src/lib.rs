//! Library for adaptive benchmark supervision and configuration search
//!
//! This crate provides the core functionality for:
//! - Running `db_bench` inside a cgroup v2 resource group
//! - Detecting throughput regression and restarting or live-patching
//! - Pushing tunables through a shared-memory channel
//! - Searching configurations as a tree of deltas
//! - Insight memory, metrics and progress reporting

pub mod context;
pub mod error;
pub mod extract;
pub mod insights;
pub mod live_config;
pub mod models;
pub mod observability;
pub mod options;
pub mod oracle;
pub mod orchestrator;
pub mod progress;
pub mod resource;
pub mod runner;
pub mod search;
pub mod settings;
pub mod supervisor;
pub mod trace;

#[cfg(test)]
pub(crate) mod testing;

pub use context::TuneContext;
pub use error::{Result, TuneError};
pub use models::*;
pub use observability::{StructuredLogger, TunerMetrics};
pub use orchestrator::{SearchOrchestrator, SearchReport};
pub use progress::{Phase, ProgressBoard, ProgressSnapshot};
pub use runner::{BenchmarkRunner, Evaluation, EvaluationRequest};
pub use settings::TunerSettings;
