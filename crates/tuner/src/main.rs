//! db-tuner - adaptive db_bench configuration search
//!
//! Runs the search loop against a proposer/oracle service and serves
//! progress and metrics over HTTP while it works.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tuner_lib::extract::{DbBenchExtractor, MetricsExtractor};
use tuner_lib::insights::InsightMemory;
use tuner_lib::resource::{DirectHelper, PrivilegedHelper, SudoHelper};
use tuner_lib::search::SearchNode;
use tuner_lib::supervisor::{BenchmarkSupervisor, SystemLauncher};
use tuner_lib::trace::FeatureTraceAnalyzer;
use tuner_lib::{BenchmarkRunner, SearchOrchestrator, TuneContext};

mod api;
mod config;
mod oracle_client;

const TUNER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Adaptive db_bench configuration search
#[derive(Parser)]
#[command(name = "db-tuner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Initial RocksDB options file
    #[arg(long, short)]
    options: PathBuf,

    /// Configuration file (can also be set via TUNER_CONFIG)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Reasoning recorded on the root node
    #[arg(long, default_value = "initial configuration")]
    reasoning: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let cli = Cli::parse();
    let config = config::TunerConfig::load(cli.config.as_deref())?;
    let workload = config.benchmark.workload.clone();

    let session = format!("{}-{}", workload, chrono::Utc::now().format("%Y%m%dT%H%M%S"));
    let ctx = TuneContext::new(config.into_settings(), session);
    ctx.logger.log_startup(TUNER_VERSION, &workload);

    let state = Arc::new(api::AppState::new(ctx.progress.clone()));
    let api_handle = tokio::spawn(api::serve(config.api_port, state));

    let options = tokio::fs::read_to_string(&cli.options)
        .await
        .with_context(|| format!("Failed to read options file {:?}", cli.options))?;

    let helper: Arc<dyn PrivilegedHelper> = match &config.supervisor.helper_script {
        Some(script) => Arc::new(SudoHelper::new(script)),
        None => Arc::new(DirectHelper),
    };
    let extractor: Arc<dyn MetricsExtractor> = Arc::new(DbBenchExtractor);
    let oracle = Arc::new(oracle_client::HttpOracle::new(
        &config.oracle.url,
        Duration::from_secs(config.oracle.timeout_secs),
    )?);

    let supervisor = BenchmarkSupervisor::new(
        ctx.clone(),
        helper,
        Arc::new(SystemLauncher),
        extractor.clone(),
        oracle.clone(),
        Arc::new(FeatureTraceAnalyzer::new(
            config.benchmark.trace_features.clone(),
        )),
    );
    let runner = BenchmarkRunner::new(
        ctx.clone(),
        supervisor,
        extractor,
        oracle.clone(),
        config.benchmark.command(),
    );

    let search = &ctx.settings.search;
    let memory = InsightMemory::load(&search.positive_insights, &search.negative_insights)?;
    info!(insights = memory.len(), "Insight memory loaded");

    let root = SearchNode::new(options, config.benchmark.extra_args.clone(), cli.reasoning);
    let mut orchestrator = SearchOrchestrator::new(
        ctx.clone(),
        runner,
        oracle.clone(),
        oracle,
        memory,
        root,
        workload,
    );

    let outcome = tokio::select! {
        outcome = orchestrator.run() => outcome,
        _ = tokio::signal::ctrl_c() => {
            ctx.logger.log_shutdown("SIGINT received");
            api_handle.abort();
            return Ok(());
        }
    };
    api_handle.abort();

    match outcome {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            ctx.logger.log_shutdown("search finished");
            if report.best_node.is_none() {
                anyhow::bail!("No configuration completed a successful benchmark run");
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Search failed");
            ctx.logger.log_shutdown("search failed");
            Err(e.into())
        }
    }
}
