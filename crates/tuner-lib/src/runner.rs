//! One evaluation of a configuration: supervised run, metric extraction,
//! persistence of the options that ran and bounded repair of rejected
//! configurations.

use crate::context::TuneContext;
use crate::error::{Result, TuneError};
use crate::extract::MetricsExtractor;
use crate::models::{BenchmarkResult, UsageStats};
use crate::options::apply_deltas;
use crate::oracle::{CorrectionContext, Proposer};
use crate::search::NodeId;
use crate::supervisor::{
    BenchmarkCommand, BenchmarkSupervisor, RunState, SuperviseRequest, SupervisedRun,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// File the benchmark loads its options from
const CURRENT_OPTIONS: &str = "current.ini";

#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub node: NodeId,
    pub options: String,
    /// Workload flags appended after the generic arguments
    pub bench_args: Vec<String>,
    pub reasoning: String,
    pub baseline_throughput: Option<f64>,
}

/// Terminal outcome of one evaluation
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub is_error: bool,
    pub detail: String,
    pub result: BenchmarkResult,
    pub usage: UsageStats,
    /// Options that actually ran, corrections and live patches included
    pub options: String,
    pub options_path: PathBuf,
    pub corrections: u32,
    pub resets: u32,
    pub live_patches: u32,
}

pub struct BenchmarkRunner {
    ctx: TuneContext,
    supervisor: BenchmarkSupervisor,
    extractor: Arc<dyn MetricsExtractor>,
    proposer: Arc<dyn Proposer>,
    template: BenchmarkCommand,
    last_good: Mutex<Option<String>>,
}

impl BenchmarkRunner {
    pub fn new(
        ctx: TuneContext,
        supervisor: BenchmarkSupervisor,
        extractor: Arc<dyn MetricsExtractor>,
        proposer: Arc<dyn Proposer>,
        template: BenchmarkCommand,
    ) -> Self {
        Self {
            ctx,
            supervisor,
            extractor,
            proposer,
            template,
            last_good: Mutex::new(None),
        }
    }

    fn output_dir(&self) -> &Path {
        &self.ctx.settings.runner.output_dir
    }

    fn command_for(&self, request: &EvaluationRequest) -> BenchmarkCommand {
        let mut command = self.template.clone();
        command.db_path = self.ctx.settings.runner.db_path.clone();
        command.options_file = Some(self.output_dir().join(CURRENT_OPTIONS));
        if self.ctx.settings.supervisor.live_patch {
            command.dynamic_options_file = Some(self.ctx.settings.channel.path.clone());
        }
        command.extra_args = request.bench_args.clone();
        command
    }

    /// Run `request` to a terminal outcome
    ///
    /// Launch and resource-group failures are returned as errors. Everything
    /// else, including a configuration that stays rejected after every
    /// correction attempt, is an `Evaluation` with `is_error` set.
    pub async fn evaluate(&self, request: &EvaluationRequest) -> Result<Evaluation> {
        let limit = self.ctx.settings.runner.error_correction_limit;
        tokio::fs::create_dir_all(self.output_dir()).await?;

        let mut options = request.options.clone();
        let mut corrections = 0u32;

        loop {
            let supervise = SuperviseRequest {
                command: self.command_for(request),
                options: options.clone(),
                baseline_throughput: request.baseline_throughput,
                retry_budget: self.ctx.settings.supervisor.retry_budget,
            };
            let run = self.supervisor.run(&supervise).await?;
            let mut result = self.extractor.extract(&run.raw_output);

            if run.outcome == RunState::Failed {
                let detail = run
                    .failure
                    .clone()
                    .unwrap_or_else(|| "benchmark failed".to_string());
                if result.error.is_none() {
                    result.error = Some(detail.clone());
                }
                let path = self
                    .store_incorrect(request, &run.effective_config, &detail)
                    .await?;
                self.ctx.logger.log_benchmark_failed(
                    Some(request.node),
                    &detail,
                    run.usage.avg_cpu_percent,
                    run.usage.avg_mem_percent,
                    &run.effective_config,
                );
                return Ok(Evaluation {
                    is_error: true,
                    detail,
                    result,
                    usage: run.usage,
                    options: run.effective_config,
                    options_path: path,
                    corrections,
                    resets: run.resets,
                    live_patches: run.live_patches,
                });
            }

            if let Some(error) = result.error.clone() {
                let path = self.store_incorrect(request, &options, &error).await?;

                if corrections >= limit {
                    let detail = TuneError::ConfigParse {
                        attempts: corrections,
                        detail: error,
                    }
                    .to_string();
                    self.restore_last_good().await?;
                    self.ctx.metrics.inc_failed_runs();
                    self.ctx.logger.log_benchmark_failed(
                        Some(request.node),
                        &detail,
                        run.usage.avg_cpu_percent,
                        run.usage.avg_mem_percent,
                        &options,
                    );
                    return Ok(Evaluation {
                        is_error: true,
                        detail,
                        result,
                        usage: run.usage,
                        options,
                        options_path: path,
                        corrections,
                        resets: run.resets,
                        live_patches: run.live_patches,
                    });
                }

                corrections += 1;
                warn!(
                    node_id = %request.node,
                    attempt = corrections,
                    error = %error,
                    "Benchmark rejected configuration, requesting a correction"
                );
                let fix = self
                    .proposer
                    .correct_config(&CorrectionContext {
                        options: options.clone(),
                        bench_args: request.bench_args.clone(),
                        reasoning: request.reasoning.clone(),
                        error,
                        attempt: corrections,
                    })
                    .await?;
                options = apply_deltas(&options, &fix.option_deltas);
                continue;
            }

            if let Some(detail) = unusable(&run, &result) {
                let path = self
                    .store_incorrect(request, &run.effective_config, &detail)
                    .await?;
                self.ctx.metrics.inc_failed_runs();
                self.ctx.logger.log_benchmark_failed(
                    Some(request.node),
                    &detail,
                    run.usage.avg_cpu_percent,
                    run.usage.avg_mem_percent,
                    &run.effective_config,
                );
                result.error = Some(detail.clone());
                return Ok(Evaluation {
                    is_error: true,
                    detail,
                    result,
                    usage: run.usage,
                    options: run.effective_config,
                    options_path: path,
                    corrections,
                    resets: run.resets,
                    live_patches: run.live_patches,
                });
            }

            let path = self.output_dir().join(format!("{}.ini", request.node));
            tokio::fs::write(&path, &run.effective_config).await?;
            *self.last_good.lock().await = Some(run.effective_config.clone());

            if let Some(ops) = result.ops_per_sec {
                self.ctx.metrics.set_last_throughput(ops);
            }
            info!(
                node_id = %request.node,
                ops_per_sec = ?result.ops_per_sec,
                resets = run.resets,
                live_patches = run.live_patches,
                corrections,
                "Evaluation finished"
            );

            return Ok(Evaluation {
                is_error: false,
                detail: String::new(),
                result,
                usage: run.usage,
                options: run.effective_config,
                options_path: path,
                corrections,
                resets: run.resets,
                live_patches: run.live_patches,
            });
        }
    }

    async fn store_incorrect(&self, request: &EvaluationRequest, options: &str, error: &str) -> Result<PathBuf> {
        let path = self
            .output_dir()
            .join(format!("{}-incorrect_options.ini", request.node));
        let mut content = String::new();
        for line in error.lines() {
            content.push_str(&format!("# result: {line}\n"));
        }
        for line in request.reasoning.lines() {
            content.push_str(&format!("# reasoning: {line}\n"));
        }
        content.push_str(options);
        tokio::fs::write(&path, content).await?;
        Ok(path)
    }

    async fn restore_last_good(&self) -> Result<()> {
        let last_good = self.last_good.lock().await.clone();
        match last_good {
            Some(options) => {
                tokio::fs::write(self.output_dir().join(CURRENT_OPTIONS), options).await?;
                info!("Restored last known-good options file");
            }
            None => warn!("No known-good options to restore"),
        }
        Ok(())
    }
}

/// Why a run that finished without an options error still produced nothing usable
fn unusable(run: &SupervisedRun, result: &BenchmarkResult) -> Option<String> {
    let last_line = run
        .raw_output
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("no output");
    match run.exit_code {
        Some(code) if code != 0 => Some(format!(
            "benchmark exited with status {code}: {last_line}"
        )),
        _ if !result.is_usable() => Some(format!("benchmark reported no result: {last_line}")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::DbBenchExtractor;
    use crate::options::ConfigDelta;
    use crate::resource::{DirectHelper, PrivilegedHelper};
    use crate::testing::{
        progress, summary, test_context, test_settings, ScriptedLauncher, ScriptedProposer, BASE_OPTIONS,
    };
    use crate::trace::NullTraceAnalyzer;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const REJECTED: &str = "Unable to load options file current.ini: Invalid argument: Unrecognized option";

    fn runner(
        dir: &TempDir,
        launcher: Arc<ScriptedLauncher>,
        proposer: Arc<ScriptedProposer>,
    ) -> BenchmarkRunner {
        let ctx = test_context(test_settings(dir.path()));
        let helper: Arc<dyn PrivilegedHelper> = Arc::new(DirectHelper);
        let extractor: Arc<dyn MetricsExtractor> = Arc::new(DbBenchExtractor);
        let supervisor = BenchmarkSupervisor::new(
            ctx.clone(),
            helper,
            launcher,
            extractor.clone(),
            proposer.clone(),
            Arc::new(NullTraceAnalyzer),
        );
        BenchmarkRunner::new(
            ctx,
            supervisor,
            extractor,
            proposer,
            BenchmarkCommand::new("db_bench", "/unused", "fillrandom"),
        )
    }

    fn request(options: &str) -> EvaluationRequest {
        EvaluationRequest {
            node: NodeId(1),
            options: options.to_string(),
            bench_args: vec!["--value_size=400".to_string()],
            reasoning: "raise background jobs".to_string(),
            baseline_throughput: None,
        }
    }

    #[tokio::test]
    async fn test_successful_evaluation_persists_options() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec![progress(900.0), summary(900)]]));
        let runner = runner(&dir, launcher.clone(), Arc::new(ScriptedProposer::default()));

        tokio::fs::create_dir_all(dir.path().join("db/stale")).await.unwrap();
        let evaluation = runner.evaluate(&request(BASE_OPTIONS)).await.unwrap();

        assert!(!evaluation.is_error);
        assert_eq!(evaluation.result.ops_per_sec, Some(900.0));
        assert_eq!(evaluation.options_path, dir.path().join("output/1.ini"));
        let stored = tokio::fs::read_to_string(&evaluation.options_path).await.unwrap();
        assert_eq!(stored, BASE_OPTIONS);
        assert!(!dir.path().join("db").exists());

        let args = &launcher.launches()[0];
        assert_eq!(args.last().unwrap(), "--value_size=400");
        assert!(args.contains(&format!("--db={}", dir.path().join("db").display())));
    }

    #[tokio::test]
    async fn test_rejected_config_is_corrected() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(ScriptedLauncher::new(vec![
            vec![REJECTED.to_string()],
            vec![summary(700)],
        ]));
        let proposer = Arc::new(ScriptedProposer {
            correction: ConfigDelta::new("DBOptions").with("max_background_jobs", "4"),
            ..Default::default()
        });
        let runner = runner(&dir, launcher.clone(), proposer.clone());

        let evaluation = runner.evaluate(&request(BASE_OPTIONS)).await.unwrap();

        assert!(!evaluation.is_error);
        assert_eq!(evaluation.corrections, 1);
        assert_eq!(proposer.corrections.load(Ordering::SeqCst), 1);
        assert!(evaluation.options.contains("  max_background_jobs=4"));

        let incorrect = tokio::fs::read_to_string(dir.path().join("output/1-incorrect_options.ini"))
            .await
            .unwrap();
        assert!(incorrect.starts_with("# result: Unable to load options file"));
        assert!(incorrect.contains("# reasoning: raise background jobs"));
        assert!(incorrect.contains("max_background_jobs=2"));
    }

    #[tokio::test]
    async fn test_correction_budget_is_bounded() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(
            ScriptedLauncher::new(vec![vec![summary(800)]]).with_fallback(vec![REJECTED.to_string()]),
        );
        let proposer = Arc::new(ScriptedProposer::default());
        let runner = runner(&dir, launcher.clone(), proposer.clone());

        // A first good run becomes the known-good configuration
        let mut good = request(BASE_OPTIONS);
        good.node = NodeId(0);
        assert!(!runner.evaluate(&good).await.unwrap().is_error);

        let broken = BASE_OPTIONS.replace("max_open_files=-1", "max_open_files=banana");
        let evaluation = runner.evaluate(&request(&broken)).await.unwrap();

        assert!(evaluation.is_error);
        assert!(evaluation.detail.contains("after 2 correction attempts"));
        assert_eq!(proposer.corrections.load(Ordering::SeqCst), 2);
        assert_eq!(launcher.launch_count(), 4);

        let current = tokio::fs::read_to_string(dir.path().join("output/current.ini"))
            .await
            .unwrap();
        assert_eq!(current, BASE_OPTIONS);
    }

    #[tokio::test]
    async fn test_crashed_run_is_an_error() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(ScriptedLauncher::new(vec![vec![
            progress(900.0),
            "Segmentation fault (core dumped)".to_string(),
        ]]));
        launcher.exit_code.store(139, Ordering::SeqCst);
        let proposer = Arc::new(ScriptedProposer::default());
        let runner = runner(&dir, launcher.clone(), proposer.clone());

        let evaluation = runner.evaluate(&request(BASE_OPTIONS)).await.unwrap();

        assert!(evaluation.is_error);
        assert!(evaluation.detail.contains("status 139"));
        assert!(evaluation.detail.contains("Segmentation fault"));
        assert_eq!(evaluation.options_path, dir.path().join("output/1-incorrect_options.ini"));
        assert!(!dir.path().join("output/1.ini").exists());
        assert_eq!(proposer.corrections.load(Ordering::SeqCst), 0);
        assert!(runner.last_good.lock().await.is_none());
    }

    #[tokio::test]
    async fn test_run_without_summary_is_an_error() {
        let dir = TempDir::new().unwrap();
        let launcher = Arc::new(ScriptedLauncher::new(vec![
            vec![summary(800)],
            vec![progress(900.0), "Received signal 6".to_string()],
        ]));
        let runner = runner(&dir, launcher.clone(), Arc::new(ScriptedProposer::default()));

        let mut good = request(BASE_OPTIONS);
        good.node = NodeId(0);
        assert!(!runner.evaluate(&good).await.unwrap().is_error);

        let truncated = BASE_OPTIONS.replace("max_background_jobs=2", "max_background_jobs=9");
        let evaluation = runner.evaluate(&request(&truncated)).await.unwrap();

        assert!(evaluation.is_error);
        assert!(evaluation.detail.starts_with("benchmark reported no result"));
        assert_eq!(evaluation.result.error.as_deref(), Some(evaluation.detail.as_str()));
        assert!(!dir.path().join("output/1.ini").exists());
        assert_eq!(runner.last_good.lock().await.as_deref(), Some(BASE_OPTIONS));
    }
}
