//! Supervised benchmark execution
//!
//! Every launch clears the database and page cache first, then starts the
//! benchmark inside a fresh resource group, streams its output, and watches
//! throughput against a baseline:
//! - a mild regression restarts the benchmark with a replacement configuration
//! - a severe regression (once restarts are spent) pushes a live patch
//! - with live patching disabled, a regression past the budget fails the run

mod command;
mod process;


pub use command::BenchmarkCommand;
pub use process::{BenchmarkProcess, ProcessLauncher, SystemLauncher};

use crate::context::TuneContext;
use crate::error::{Result, TuneError};
use crate::extract::MetricsExtractor;
use crate::live_config::{LiveConfigChannel, LiveUpdate, FIELDS};
use crate::models::UsageStats;
use crate::options::merge_live_patch;
use crate::oracle::{LivePatchContext, Proposer, ReconfigContext};
use crate::resource::{MonitorConfig, PrivilegedHelper, ResourceGroup, ResourceMonitor};
use crate::settings::SupervisorSettings;
use crate::trace::TraceAnalyzer;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle of a supervised run
const DROP_CACHES: &str = "/proc/sys/vm/drop_caches";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Starting,
    Running,
    Completed,
    Reset,
    LivePatch,
    Failed,
}

/// Action taken on one evaluated throughput sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Continue,
    Reset,
    LivePatch,
    Fail,
}

/// Map a throughput ratio to an action
///
/// Restarts are preferred while the budget lasts. A live patch is only
/// considered once restarts are spent.
pub fn decide(
    ratio: f64,
    retry: u32,
    budget: u32,
    settings: &SupervisorSettings,
    live_patch: bool,
) -> Action {
    if ratio < settings.reset_ratio && retry < budget {
        Action::Reset
    } else if live_patch && ratio < settings.patch_ratio {
        Action::LivePatch
    } else if ratio < settings.reset_ratio && !live_patch {
        Action::Fail
    } else {
        Action::Continue
    }
}

#[derive(Debug, Clone)]
pub struct SuperviseRequest {
    pub command: BenchmarkCommand,
    /// Options text written to `command.options_file` before each launch
    pub options: String,
    /// Throughput to hold; `None` runs unsupervised
    pub baseline_throughput: Option<f64>,
    pub retry_budget: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisedRun {
    pub raw_output: String,
    pub usage: UsageStats,
    /// Options of the final launch with any live patches folded in
    pub effective_config: String,
    pub resets: u32,
    pub live_patches: u32,
    /// `Completed` or `Failed`
    pub outcome: RunState,
    pub failure: Option<String>,
    pub exit_code: Option<i32>,
    pub duration_secs: f64,
}

enum Attempt {
    Finished(SupervisedRun),
    Regressed {
        usage: UsageStats,
        throughput: f64,
        baseline: f64,
    },
}

/// Runs benchmarks under resource isolation and throughput supervision
pub struct BenchmarkSupervisor {
    ctx: TuneContext,
    helper: Arc<dyn PrivilegedHelper>,
    launcher: Arc<dyn ProcessLauncher>,
    extractor: Arc<dyn MetricsExtractor>,
    proposer: Arc<dyn Proposer>,
    traces: Arc<dyn TraceAnalyzer>,
}

impl BenchmarkSupervisor {
    pub fn new(
        ctx: TuneContext,
        helper: Arc<dyn PrivilegedHelper>,
        launcher: Arc<dyn ProcessLauncher>,
        extractor: Arc<dyn MetricsExtractor>,
        proposer: Arc<dyn Proposer>,
        traces: Arc<dyn TraceAnalyzer>,
    ) -> Self {
        Self {
            ctx,
            helper,
            launcher,
            extractor,
            proposer,
            traces,
        }
    }

    fn settings(&self) -> &SupervisorSettings {
        &self.ctx.settings.supervisor
    }

    /// Run to completion, restarting on regression at most `retry_budget` times
    pub async fn run(&self, request: &SuperviseRequest) -> Result<SupervisedRun> {
        let started = Instant::now();
        let mut options = request.options.clone();
        let mut retry = 0u32;
        let mut live_patches = 0u32;

        loop {
            let attempt = self
                .run_once(request, &options, retry, &mut live_patches)
                .await?;

            match attempt {
                Attempt::Finished(mut run) => {
                    run.resets = retry;
                    run.live_patches = live_patches;
                    run.duration_secs = started.elapsed().as_secs_f64();
                    self.ctx.metrics.observe_benchmark_duration(run.duration_secs);
                    return Ok(run);
                }
                Attempt::Regressed {
                    usage,
                    throughput,
                    baseline,
                } => {
                    retry += 1;
                    self.ctx.logger.log_benchmark_reset(retry, throughput, baseline);
                    self.ctx.metrics.inc_resets();

                    let trace_summary = match &self.settings().trace_path {
                        Some(path) => self.traces.summarize(path).await,
                        None => None,
                    };
                    let ctx = ReconfigContext {
                        options: options.clone(),
                        bench_args: request.command.to_args(),
                        usage,
                        current_throughput: throughput,
                        baseline_throughput: baseline,
                        trace_summary,
                        retry,
                    };
                    let replacement = self.proposer.propose_full_reconfig(&ctx).await?;
                    if replacement.trim().is_empty() {
                        return Err(TuneError::Oracle(
                            "empty replacement configuration".to_string(),
                        ));
                    }
                    options = replacement;
                }
            }
        }
    }

    /// Clear the database and caches so every launch starts from the same state
    pub async fn prepare_environment(&self) -> Result<()> {
        let settings = &self.ctx.settings.runner;

        match tokio::fs::remove_dir_all(&settings.db_path).await {
            Ok(()) => debug!(path = %settings.db_path.display(), "Removed database directory"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        if settings.drop_caches {
            if let Err(e) = tokio::process::Command::new("sync").status().await {
                warn!(error = %e, "sync failed before dropping caches");
            }
            if let Err(e) = self.helper.write(Path::new(DROP_CACHES), "3").await {
                warn!(error = %e, "Could not drop page caches");
            }
        }

        if !settings.settle_delay.is_zero() {
            tokio::time::sleep(settings.settle_delay).await;
        }
        Ok(())
    }

    async fn run_once(
        &self,
        request: &SuperviseRequest,
        options: &str,
        retry: u32,
        live_patches: &mut u32,
    ) -> Result<Attempt> {
        let settings = self.settings();
        let command = &request.command;
        let baseline = request.baseline_throughput.filter(|b| *b > 0.0);
        let threads = f64::from(command.threads.unwrap_or(1).max(1));

        self.prepare_environment().await?;

        if let Some(path) = &command.options_file {
            tokio::fs::write(path, options).await?;
        }

        let mut channel = if settings.live_patch && baseline.is_some() {
            match LiveConfigChannel::create(&self.ctx.settings.channel.path) {
                Ok(channel) => Some(channel),
                Err(e) => {
                    warn!(error = %e, "Live patching disabled for this run");
                    self.ctx.metrics.inc_live_channel_errors();
                    None
                }
            }
        } else {
            None
        };
        let live_enabled = channel.is_some();

        debug!(state = ?RunState::Starting, retry, "Preparing benchmark run");
        let mut group =
            ResourceGroup::create(Arc::clone(&self.helper), &settings.cgroup_root, &settings.group_name)
                .await?;
        if let Err(e) = group.apply_limits(&settings.limits).await {
            discard_group(group).await;
            return Err(e);
        }

        let args = command.to_args();
        let mut process = match self.launcher.launch(&command.executable, &args).await {
            Ok(process) => process,
            Err(e) => {
                discard_group(group).await;
                return Err(e);
            }
        };
        self.ctx.metrics.inc_benchmark_runs();

        if let Some(pid) = process.pid() {
            if let Err(e) = group.add_process(pid).await {
                kill(process.as_mut()).await;
                discard_group(group).await;
                return Err(e);
            }
        }

        let mut monitor = ResourceMonitor::new(
            group.path(),
            MonitorConfig {
                interval: settings.monitor_interval,
                cpu_cores: settings.limits.cpu_cores,
                memory_bytes: settings.limits.memory_bytes,
            },
        );
        monitor.start_monitoring();

        info!(
            state = ?RunState::Running,
            program = %command.executable.display(),
            pid = ?process.pid(),
            baseline = ?baseline,
            retry,
            "Benchmark running"
        );

        let launched = Instant::now();
        let mut last_eval: Option<Instant> = None;
        let mut raw_output = String::new();
        let mut saw_throughput = false;
        let mut effective = options.to_string();

        while let Some(line) = process.next_line().await {
            raw_output.push_str(&line);
            raw_output.push('\n');

            let Some(baseline) = baseline else { continue };
            if launched.elapsed() < settings.warmup {
                continue;
            }
            if last_eval.is_some_and(|t| t.elapsed() < settings.sample_interval) {
                continue;
            }
            let Some(sample) = self.extractor.throughput_sample(&line) else {
                debug!("No throughput in output line");
                continue;
            };

            let throughput = sample * threads;
            saw_throughput = true;
            last_eval = Some(Instant::now());
            self.ctx.metrics.set_last_throughput(throughput);

            let ratio = throughput / baseline;
            let action = decide(ratio, retry, request.retry_budget, settings, live_enabled);
            debug!(throughput, baseline, ratio, action = ?action, "Evaluated throughput");

            match action {
                Action::Continue => {}
                Action::Reset => {
                    let usage = monitor.stop_monitoring().await;
                    kill(process.as_mut()).await;
                    group.delete().await?;
                    info!(state = ?RunState::Reset, ratio, "Benchmark stopped for reconfiguration");
                    return Ok(Attempt::Regressed {
                        usage,
                        throughput,
                        baseline,
                    });
                }
                Action::LivePatch => {
                    if let Some(channel) = channel.as_mut() {
                        let window = monitor.last_n_stats(settings.sample_interval);
                        if let Some(patch) = self
                            .live_patch(request, channel, &effective, window, throughput, baseline)
                            .await
                        {
                            effective = merge_live_patch(&effective, &patch);
                            *live_patches += 1;
                        }
                    }
                }
                Action::Fail => {
                    let usage = monitor.stop_monitoring().await;
                    kill(process.as_mut()).await;
                    group.delete().await?;

                    let reason = format!(
                        "throughput {throughput:.1} fell to {:.0}% of baseline {baseline:.1} with no restarts left",
                        ratio * 100.0
                    );
                    error!(state = ?RunState::Failed, %reason, "Benchmark failed");
                    self.ctx.metrics.inc_failed_runs();
                    return Ok(Attempt::Finished(SupervisedRun {
                        raw_output,
                        usage,
                        effective_config: effective,
                        resets: 0,
                        live_patches: 0,
                        outcome: RunState::Failed,
                        failure: Some(reason),
                        exit_code: None,
                        duration_secs: 0.0,
                    }));
                }
            }
        }

        let exit_code = match process.wait().await {
            Ok(code) => code,
            Err(e) => {
                warn!(error = %e, "Could not collect benchmark exit status");
                None
            }
        };
        let usage = monitor.stop_monitoring().await;
        group.delete().await?;

        if baseline.is_some() && !saw_throughput {
            warn!("No throughput signal in benchmark output, ran unsupervised");
        }
        info!(state = ?RunState::Completed, exit_code = ?exit_code, "Benchmark finished");

        Ok(Attempt::Finished(SupervisedRun {
            raw_output,
            usage,
            effective_config: effective,
            resets: 0,
            live_patches: 0,
            outcome: RunState::Completed,
            failure: None,
            exit_code,
            duration_secs: 0.0,
        }))
    }

    /// Ask for a partial update and push it; returns the patch text on success
    async fn live_patch(
        &self,
        request: &SuperviseRequest,
        channel: &mut LiveConfigChannel,
        effective: &str,
        usage: UsageStats,
        throughput: f64,
        baseline: f64,
    ) -> Option<String> {
        let settings = self.settings();
        let recent_trace = match &settings.trace_path {
            Some(path) => {
                self.traces
                    .summarize_recent(path, settings.recent_trace_windows)
                    .await
            }
            None => None,
        };

        let ctx = LivePatchContext {
            options: effective.to_string(),
            bench_args: request.command.to_args(),
            usage,
            current_throughput: throughput,
            baseline_throughput: baseline,
            recent_trace,
        };
        let patch = match self.proposer.propose_live_patch(&ctx).await {
            Ok(patch) => patch,
            Err(e) => {
                warn!(error = %e, "No live patch available");
                return None;
            }
        };

        let before = *channel.current();
        match channel.write(&LiveUpdate::Text(patch.clone())) {
            Ok(after) => {
                let changed: Vec<&str> = FIELDS
                    .iter()
                    .zip(before.iter().zip(after.iter()))
                    .filter(|(_, (b, a))| b != a)
                    .map(|(f, _)| f.name)
                    .collect();
                debug!(state = ?RunState::LivePatch, "Live patch published");
                self.ctx.logger.log_live_patch_applied(&changed, throughput, baseline);
                self.ctx.metrics.inc_live_patches();
                Some(patch)
            }
            Err(e) => {
                warn!(error = %e, "Live patch not delivered");
                self.ctx.metrics.inc_live_channel_errors();
                None
            }
        }
    }
}

async fn kill(process: &mut dyn BenchmarkProcess) {
    if let Err(e) = process.kill().await {
        warn!(error = %e, "Failed to kill benchmark process");
    }
}

/// Delete a group on an error path where the original error wins
async fn discard_group(group: ResourceGroup) {
    if let Err(e) = group.delete().await {
        warn!(error = %e, "Failed to delete resource group during cleanup");
    }
}
