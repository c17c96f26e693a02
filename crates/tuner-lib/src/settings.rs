//! Tunable knobs of the supervisor, runner and search loop

use crate::live_config::DEFAULT_CHANNEL_PATH;
use crate::models::ResourceLimits;
use crate::resource::DEFAULT_CGROUP_ROOT;
use std::path::PathBuf;
use std::time::Duration;

/// Regression detection and resource isolation for one benchmark run
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Throughput lines are ignored until this long after launch
    pub warmup: Duration,
    /// Minimum spacing between two regression evaluations
    pub sample_interval: Duration,
    /// Below this fraction of the baseline the run is restarted
    pub reset_ratio: f64,
    /// Below this fraction (and with resets exhausted) a live patch is pushed
    pub patch_ratio: f64,
    /// Restarts allowed per top-level run
    pub retry_budget: u32,
    pub live_patch: bool,
    pub cgroup_root: PathBuf,
    pub group_name: String,
    pub monitor_interval: Duration,
    pub limits: ResourceLimits,
    /// Block trace collected alongside the benchmark, if any
    pub trace_path: Option<PathBuf>,
    pub recent_trace_windows: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(100),
            sample_interval: Duration::from_secs(90),
            reset_ratio: 0.9,
            patch_ratio: 0.6,
            retry_budget: 3,
            live_patch: false,
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
            group_name: "db_tuner".to_string(),
            monitor_interval: Duration::from_secs(1),
            limits: ResourceLimits::default(),
            trace_path: None,
            recent_trace_windows: 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub path: PathBuf,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_CHANNEL_PATH),
        }
    }
}

/// Environment preparation and failure handling around each run
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub db_path: PathBuf,
    /// Options files and raw outputs are written here
    pub output_dir: PathBuf,
    pub drop_caches: bool,
    /// Pause after the cache flush so memory and IO settle
    pub settle_delay: Duration,
    pub error_correction_limit: u32,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/tmp/db_tuner/db"),
            output_dir: PathBuf::from("output"),
            drop_caches: true,
            settle_delay: Duration::from_secs(10),
            error_correction_limit: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub iterations: usize,
    /// Exact number of children a leaf expands into
    pub children_per_expansion: usize,
    /// Insights shown to the proposer on expansion
    pub insights_top_k: usize,
    pub reflect: bool,
    pub record_log: PathBuf,
    pub tree_dump: PathBuf,
    pub positive_insights: PathBuf,
    pub negative_insights: PathBuf,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            iterations: 3,
            children_per_expansion: 3,
            insights_top_k: 5,
            reflect: true,
            record_log: PathBuf::from("output/records.jsonl"),
            tree_dump: PathBuf::from("output/tree.json"),
            positive_insights: PathBuf::from("output/positive_insights.jsonl"),
            negative_insights: PathBuf::from("output/negative_insights.jsonl"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TunerSettings {
    pub supervisor: SupervisorSettings,
    pub channel: ChannelSettings,
    pub runner: RunnerSettings,
    pub search: SearchSettings,
}
