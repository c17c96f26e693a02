//! Tuner configuration

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tuner_lib::live_config::DEFAULT_CHANNEL_PATH;
use tuner_lib::models::ResourceLimits;
use tuner_lib::resource::DEFAULT_CGROUP_ROOT;
use tuner_lib::settings::{
    ChannelSettings, RunnerSettings, SearchSettings, SupervisorSettings, TunerSettings,
};
use tuner_lib::supervisor::BenchmarkCommand;

/// Environment variable naming an optional configuration file
pub const CONFIG_ENV: &str = "TUNER_CONFIG";

/// Tuner configuration
///
/// Every field has a default, so an empty source yields a usable setup.
/// Environment overrides use the `TUNER_` prefix with `__` between levels,
/// e.g. `TUNER_SEARCH__ITERATIONS=5`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Port of the status and metrics server
    pub api_port: u16,
    pub oracle: OracleConfig,
    pub benchmark: BenchmarkConfig,
    pub supervisor: SupervisorConfig,
    pub runner: RunnerConfig,
    pub search: SearchConfig,
}

impl Default for TunerConfig {
    fn default() -> Self {
        Self {
            api_port: 9100,
            oracle: OracleConfig::default(),
            benchmark: BenchmarkConfig::default(),
            supervisor: SupervisorConfig::default(),
            runner: RunnerConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL of the proposer/oracle service
    pub url: String,
    /// Proposals can take minutes to produce
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/".to_string(),
            timeout_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    pub executable: PathBuf,
    pub workload: String,
    pub threads: Option<u32>,
    pub duration_secs: Option<u64>,
    pub num: Option<u64>,
    pub stats_interval_secs: Option<u64>,
    pub trace_file: Option<PathBuf>,
    /// Windowed feature table of the trace; defaults to a file beside the trace
    pub trace_features: Option<PathBuf>,
    pub extra_args: Vec<String>,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("db_bench"),
            workload: "fillrandom".to_string(),
            threads: None,
            duration_secs: None,
            num: None,
            stats_interval_secs: Some(5),
            trace_file: None,
            trace_features: None,
            extra_args: Vec::new(),
        }
    }
}

impl BenchmarkConfig {
    /// Command template; db path and options file are filled in per run
    pub fn command(&self) -> BenchmarkCommand {
        let mut command = BenchmarkCommand::new(&self.executable, "", &self.workload);
        command.threads = self.threads;
        command.duration_secs = self.duration_secs;
        command.num = self.num;
        command.stats_interval_secs = self.stats_interval_secs;
        command.trace_file = self.trace_file.clone();
        command.extra_args = self.extra_args.clone();
        command
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub warmup_secs: u64,
    pub sample_interval_secs: u64,
    pub reset_ratio: f64,
    pub patch_ratio: f64,
    pub retry_budget: u32,
    pub live_patch: bool,
    pub channel_path: PathBuf,
    pub cgroup_root: PathBuf,
    pub group_name: String,
    /// Root helper script run through sudo; plain filesystem calls when unset
    pub helper_script: Option<PathBuf>,
    pub monitor_interval_ms: u64,
    pub cpu_cores: f64,
    pub memory_bytes: u64,
    pub swap_bytes: u64,
    pub recent_trace_windows: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        let limits = ResourceLimits::default();
        Self {
            warmup_secs: 100,
            sample_interval_secs: 90,
            reset_ratio: 0.9,
            patch_ratio: 0.6,
            retry_budget: 3,
            live_patch: false,
            channel_path: PathBuf::from(DEFAULT_CHANNEL_PATH),
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
            group_name: "db_tuner".to_string(),
            helper_script: None,
            monitor_interval_ms: 1000,
            cpu_cores: limits.cpu_cores,
            memory_bytes: limits.memory_bytes,
            swap_bytes: limits.swap_bytes,
            recent_trace_windows: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub db_path: PathBuf,
    pub output_dir: PathBuf,
    pub drop_caches: bool,
    pub settle_delay_secs: u64,
    pub error_correction_limit: u32,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        let defaults = RunnerSettings::default();
        Self {
            db_path: defaults.db_path,
            output_dir: defaults.output_dir,
            drop_caches: defaults.drop_caches,
            settle_delay_secs: defaults.settle_delay.as_secs(),
            error_correction_limit: defaults.error_correction_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub iterations: usize,
    pub children_per_expansion: usize,
    pub insights_top_k: usize,
    pub reflect: bool,
    pub record_log: PathBuf,
    pub tree_dump: PathBuf,
    pub positive_insights: PathBuf,
    pub negative_insights: PathBuf,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let defaults = SearchSettings::default();
        Self {
            iterations: defaults.iterations,
            children_per_expansion: defaults.children_per_expansion,
            insights_top_k: defaults.insights_top_k,
            reflect: defaults.reflect,
            record_log: defaults.record_log,
            tree_dump: defaults.tree_dump,
            positive_insights: defaults.positive_insights,
            negative_insights: defaults.negative_insights,
        }
    }
}

impl TunerConfig {
    /// Load configuration from an optional file and the environment
    ///
    /// An explicit `path` wins over `TUNER_CONFIG`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));

        let mut builder = config::Config::builder();
        if let Some(file) = &file {
            builder = builder.add_source(config::File::from(file.as_path()));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix("TUNER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read tuner configuration")?;

        config
            .try_deserialize()
            .context("Invalid tuner configuration")
    }

    pub fn into_settings(&self) -> TunerSettings {
        let sup = &self.supervisor;
        TunerSettings {
            supervisor: SupervisorSettings {
                warmup: Duration::from_secs(sup.warmup_secs),
                sample_interval: Duration::from_secs(sup.sample_interval_secs),
                reset_ratio: sup.reset_ratio,
                patch_ratio: sup.patch_ratio,
                retry_budget: sup.retry_budget,
                live_patch: sup.live_patch,
                cgroup_root: sup.cgroup_root.clone(),
                group_name: sup.group_name.clone(),
                monitor_interval: Duration::from_millis(sup.monitor_interval_ms),
                limits: ResourceLimits {
                    cpu_cores: sup.cpu_cores,
                    memory_bytes: sup.memory_bytes,
                    swap_bytes: sup.swap_bytes,
                },
                trace_path: self.benchmark.trace_file.clone(),
                recent_trace_windows: sup.recent_trace_windows,
            },
            channel: ChannelSettings {
                path: sup.channel_path.clone(),
            },
            runner: RunnerSettings {
                db_path: self.runner.db_path.clone(),
                output_dir: self.runner.output_dir.clone(),
                drop_caches: self.runner.drop_caches,
                settle_delay: Duration::from_secs(self.runner.settle_delay_secs),
                error_correction_limit: self.runner.error_correction_limit,
            },
            search: SearchSettings {
                iterations: self.search.iterations,
                children_per_expansion: self.search.children_per_expansion,
                insights_top_k: self.search.insights_top_k,
                reflect: self.search.reflect,
                record_log: self.search.record_log.clone(),
                tree_dump: self.search.tree_dump.clone(),
                positive_insights: self.search.positive_insights.clone(),
                negative_insights: self.search.negative_insights.clone(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_library_settings() {
        let settings = TunerConfig::default().into_settings();
        let defaults = TunerSettings::default();

        assert_eq!(settings.supervisor.warmup, defaults.supervisor.warmup);
        assert_eq!(settings.supervisor.sample_interval, defaults.supervisor.sample_interval);
        assert_eq!(settings.supervisor.retry_budget, 3);
        assert_eq!(settings.supervisor.limits, defaults.supervisor.limits);
        assert_eq!(settings.channel.path, defaults.channel.path);
        assert_eq!(settings.runner.settle_delay, Duration::from_secs(10));
        assert_eq!(settings.search.children_per_expansion, 3);
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tuner.toml");
        std::fs::write(
            &path,
            r#"
api_port = 9200

[benchmark]
workload = "readrandom"
threads = 4
extra_args = ["--use_existing_db"]

[supervisor]
live_patch = true
warmup_secs = 30

[search]
iterations = 5
"#,
        )
        .unwrap();

        let config = TunerConfig::load(Some(&path)).unwrap();

        assert_eq!(config.api_port, 9200);
        assert_eq!(config.benchmark.workload, "readrandom");
        assert_eq!(config.supervisor.sample_interval_secs, 90);

        let settings = config.into_settings();
        assert!(settings.supervisor.live_patch);
        assert_eq!(settings.supervisor.warmup, Duration::from_secs(30));
        assert_eq!(settings.search.iterations, 5);

        let args = config.benchmark.command().to_args();
        assert!(args.contains(&"--benchmarks=readrandom".to_string()));
        assert!(args.contains(&"--threads=4".to_string()));
        assert_eq!(args.last().unwrap(), "--use_existing_db");
    }
}
