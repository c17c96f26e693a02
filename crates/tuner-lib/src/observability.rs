//! Observability for the tuner
//!
//! Provides:
//! - Prometheus metrics (benchmark duration, resets, live patches, failures, tree size)
//! - Structured logging of tuning events with tracing

use crate::search::NodeId;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_gauge, Gauge,
    Histogram, IntCounter, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Buckets for benchmark run durations (in seconds)
const DURATION_BUCKETS: &[f64] = &[
    1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1200.0, 1800.0, 3600.0,
];

static GLOBAL_METRICS: OnceLock<TunerMetricsInner> = OnceLock::new();

struct TunerMetricsInner {
    benchmark_duration_seconds: Histogram,
    benchmark_runs: IntCounter,
    benchmark_resets: IntCounter,
    live_patches: IntCounter,
    live_channel_errors: IntCounter,
    failed_runs: IntCounter,
    contract_violations: IntCounter,
    search_nodes: IntGauge,
    last_throughput: Gauge,
}

impl TunerMetricsInner {
    fn new() -> Self {
        Self {
            benchmark_duration_seconds: register_histogram!(
                "db_tuner_benchmark_duration_seconds",
                "Wall time of supervised benchmark runs",
                DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register benchmark_duration_seconds"),

            benchmark_runs: register_int_counter!(
                "db_tuner_benchmark_runs_total",
                "Benchmark processes launched"
            )
            .expect("Failed to register benchmark_runs"),

            benchmark_resets: register_int_counter!(
                "db_tuner_benchmark_resets_total",
                "Runs restarted with a new configuration after a regression"
            )
            .expect("Failed to register benchmark_resets"),

            live_patches: register_int_counter!(
                "db_tuner_live_patches_total",
                "Partial updates pushed through the live configuration channel"
            )
            .expect("Failed to register live_patches"),

            live_channel_errors: register_int_counter!(
                "db_tuner_live_channel_errors_total",
                "Failed writes to the live configuration channel"
            )
            .expect("Failed to register live_channel_errors"),

            failed_runs: register_int_counter!(
                "db_tuner_failed_runs_total",
                "Benchmark evaluations that ended in an error"
            )
            .expect("Failed to register failed_runs"),

            contract_violations: register_int_counter!(
                "db_tuner_contract_violations_total",
                "Expansions rejected because the proposer broke its contract"
            )
            .expect("Failed to register contract_violations"),

            search_nodes: register_int_gauge!(
                "db_tuner_search_nodes",
                "Nodes currently in the search tree"
            )
            .expect("Failed to register search_nodes"),

            last_throughput: register_gauge!(
                "db_tuner_last_throughput_ops_per_sec",
                "Most recent throughput sample from the running benchmark"
            )
            .expect("Failed to register last_throughput"),
        }
    }
}

/// Handle to the process-wide tuner metrics
///
/// Clones share the same underlying Prometheus collectors.
#[derive(Clone)]
pub struct TunerMetrics {
    _private: (),
}

impl Default for TunerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TunerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(TunerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &TunerMetricsInner {
        GLOBAL_METRICS.get_or_init(TunerMetricsInner::new)
    }

    pub fn observe_benchmark_duration(&self, secs: f64) {
        self.inner().benchmark_duration_seconds.observe(secs);
    }

    pub fn inc_benchmark_runs(&self) {
        self.inner().benchmark_runs.inc();
    }

    pub fn inc_resets(&self) {
        self.inner().benchmark_resets.inc();
    }

    pub fn inc_live_patches(&self) {
        self.inner().live_patches.inc();
    }

    pub fn inc_live_channel_errors(&self) {
        self.inner().live_channel_errors.inc();
    }

    pub fn inc_failed_runs(&self) {
        self.inner().failed_runs.inc();
    }

    pub fn inc_contract_violations(&self) {
        self.inner().contract_violations.inc();
    }

    pub fn set_search_nodes(&self, count: usize) {
        self.inner().search_nodes.set(count as i64);
    }

    pub fn set_last_throughput(&self, ops_per_sec: f64) {
        self.inner().last_throughput.set(ops_per_sec);
    }
}

/// Named tuning events with consistent fields
#[derive(Clone)]
pub struct StructuredLogger {
    session: String,
}

impl StructuredLogger {
    pub fn new(session: impl Into<String>) -> Self {
        Self {
            session: session.into(),
        }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn log_startup(&self, version: &str, workload: &str) {
        info!(
            event = "tuner_started",
            session = %self.session,
            tuner_version = %version,
            workload = %workload,
            "Tuning session started"
        );
    }

    pub fn log_benchmark_reset(&self, retry: u32, throughput: f64, baseline: f64) {
        warn!(
            event = "benchmark_reset",
            session = %self.session,
            retry = retry,
            throughput = throughput,
            baseline = baseline,
            ratio = throughput / baseline,
            "Throughput regressed, restarting benchmark with a new configuration"
        );
    }

    pub fn log_live_patch_applied(&self, changed: &[&str], throughput: f64, baseline: f64) {
        info!(
            event = "live_patch_applied",
            session = %self.session,
            changed = ?changed,
            throughput = throughput,
            baseline = baseline,
            "Pushed live configuration patch"
        );
    }

    /// Failed evaluation with everything needed to reproduce it
    pub fn log_benchmark_failed(
        &self,
        node: Option<NodeId>,
        reason: &str,
        avg_cpu_percent: f64,
        avg_mem_percent: f64,
        options: &str,
    ) {
        error!(
            event = "benchmark_failed",
            session = %self.session,
            node_id = ?node.map(|n| n.0),
            reason = %reason,
            avg_cpu_percent = avg_cpu_percent,
            avg_mem_percent = avg_mem_percent,
            options = %options,
            "Benchmark run failed"
        );
    }

    pub fn log_contract_violation(&self, node: NodeId, detail: &str) {
        error!(
            event = "proposer_contract_violation",
            session = %self.session,
            node_id = node.0,
            detail = %detail,
            "Proposer broke its contract, expansion skipped"
        );
    }

    pub fn log_node_selected(&self, node: NodeId, previous: NodeId, reasoning: &str) {
        info!(
            event = "node_selected",
            session = %self.session,
            node_id = node.0,
            previous_node_id = previous.0,
            reasoning = %reasoning,
            "Selected next node to explore"
        );
    }

    pub fn log_orchestration_finished(&self, best: Option<NodeId>, best_ops_per_sec: Option<f64>, nodes: usize) {
        info!(
            event = "orchestration_finished",
            session = %self.session,
            best_node_id = ?best.map(|n| n.0),
            best_ops_per_sec = ?best_ops_per_sec,
            nodes = nodes,
            "Search finished"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "tuner_shutdown",
            session = %self.session,
            reason = %reason,
            "Tuning session ending"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tuner_metrics_creation() {
        let metrics = TunerMetrics::new();
        let clone = metrics.clone();

        metrics.observe_benchmark_duration(42.0);
        metrics.inc_benchmark_runs();
        clone.inc_resets();
        clone.inc_live_patches();
        metrics.set_search_nodes(7);
        metrics.set_last_throughput(1234.5);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "db_tuner_search_nodes"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("run-1");
        assert_eq!(logger.session(), "run-1");
    }
}
