//! Scripted stand-ins for processes, proposer and oracle

use crate::context::TuneContext;
use crate::error::{Result, TuneError};
use crate::insights::{Insight, InsightDecision, InsightProperty};
use crate::oracle::{
    ChildProposal, CorrectionContext, ExpansionContext, LivePatchContext, Oracle, Proposer,
    ReconfigContext, Selection,
};
use crate::options::ConfigDelta;
use crate::search::{NodeDigest, NodeId};
use crate::settings::TunerSettings;
use crate::supervisor::{BenchmarkProcess, ProcessLauncher};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const BASE_OPTIONS: &str = "\
[Version]
  rocksdb_version=8.8.1

[DBOptions]
  max_background_jobs=2
  max_open_files=-1

[CFOptions \"default\"]
  write_buffer_size=67108864
";

/// A `db_bench` progress line whose cumulative average is `ops`
pub fn progress(ops: f64) -> String {
    format!(
        "2024/05/01-10:00:00 ... thread 0: (1000,1000) ops and ({ops:.1},{ops:.1}) ops/second in (1.000000,1.000000) seconds"
    )
}

/// A `db_bench` summary line
pub fn summary(ops: u64) -> String {
    format!("fillrandom   :      10.000 micros/op {ops} ops/sec 60.000 seconds 6000000 operations;    3.5 MB/s")
}

/// Settings with every delay removed and all paths under `root`
pub fn test_settings(root: &Path) -> TunerSettings {
    let mut settings = TunerSettings::default();
    settings.supervisor.warmup = Duration::ZERO;
    settings.supervisor.sample_interval = Duration::ZERO;
    settings.supervisor.cgroup_root = root.join("cgroup");
    settings.supervisor.monitor_interval = Duration::from_millis(10);
    settings.channel.path = root.join("live.mmap");
    settings.runner.db_path = root.join("db");
    settings.runner.output_dir = root.join("output");
    settings.runner.drop_caches = false;
    settings.runner.settle_delay = Duration::ZERO;
    settings.search.record_log = root.join("output/records.jsonl");
    settings.search.tree_dump = root.join("output/tree.json");
    settings.search.positive_insights = root.join("output/positive.jsonl");
    settings.search.negative_insights = root.join("output/negative.jsonl");
    settings
}

pub fn test_context(settings: TunerSettings) -> TuneContext {
    TuneContext::new(settings, "test-session")
}

pub struct FakeProcess {
    lines: VecDeque<String>,
    kills: Arc<AtomicUsize>,
    exit_code: i32,
}

#[async_trait]
impl BenchmarkProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(4242)
    }

    async fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    async fn kill(&mut self) -> Result<()> {
        self.lines.clear();
        self.kills.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn wait(&mut self) -> Result<Option<i32>> {
        Ok(Some(self.exit_code))
    }
}

/// Plays back one script of output lines per launch
///
/// Once the scripts run out, every further launch plays `fallback`.
#[derive(Default)]
pub struct ScriptedLauncher {
    scripts: Mutex<VecDeque<Vec<String>>>,
    fallback: Vec<String>,
    launches: Mutex<Vec<Vec<String>>>,
    pub kills: Arc<AtomicUsize>,
    pub fail: AtomicBool,
    /// Exit status reported by every launched process
    pub exit_code: AtomicI32,
    db_path: Option<PathBuf>,
    db_present: Mutex<Vec<bool>>,
}

impl ScriptedLauncher {
    pub fn new(scripts: Vec<Vec<String>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Default::default()
        }
    }

    pub fn with_fallback(mut self, fallback: Vec<String>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Record whether `db_path` exists at each launch, then create it the
    /// way the benchmark would
    pub fn watching_db(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(db_path.into());
        self
    }

    pub fn db_present_at_launch(&self) -> Vec<bool> {
        self.db_present.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn launches(&self) -> Vec<Vec<String>> {
        self.launches.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self, program: &Path, args: &[String]) -> Result<Box<dyn BenchmarkProcess>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TuneError::ProcessLaunch {
                program: program.display().to_string(),
                reason: "No such file or directory".to_string(),
            });
        }
        self.launches.lock().unwrap().push(args.to_vec());
        if let Some(db) = &self.db_path {
            self.db_present.lock().unwrap().push(db.exists());
            std::fs::create_dir_all(db)?;
            std::fs::write(db.join("LOCK"), "")?;
        }
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        Ok(Box::new(FakeProcess {
            lines: script.into(),
            kills: Arc::clone(&self.kills),
            exit_code: self.exit_code.load(Ordering::SeqCst),
        }))
    }
}

/// Proposer with canned answers and call counters
pub struct ScriptedProposer {
    pub reconfig: String,
    pub live_patch: Option<String>,
    pub correction: ConfigDelta,
    /// Children returned per expansion; `None` returns what was asked for
    pub child_count: Option<usize>,
    pub expansions: AtomicU32,
    pub reconfigs: AtomicU32,
    pub live_patches: AtomicU32,
    pub corrections: AtomicU32,
    /// Trace summaries handed over with each full reconfiguration request
    pub trace_summaries: Mutex<Vec<Option<String>>>,
    /// `max_background_jobs` of the next proposed child
    pub next_value: AtomicU32,
}

impl Default for ScriptedProposer {
    fn default() -> Self {
        Self {
            reconfig: BASE_OPTIONS.replace("max_background_jobs=2", "max_background_jobs=6"),
            live_patch: Some("max_background_jobs=8\n".to_string()),
            correction: ConfigDelta::new("DBOptions").with("max_open_files", "-1"),
            child_count: None,
            expansions: AtomicU32::new(0),
            reconfigs: AtomicU32::new(0),
            live_patches: AtomicU32::new(0),
            corrections: AtomicU32::new(0),
            trace_summaries: Mutex::new(Vec::new()),
            next_value: AtomicU32::new(3),
        }
    }
}

#[async_trait]
impl Proposer for ScriptedProposer {
    async fn propose_children(&self, ctx: &ExpansionContext) -> Result<Vec<ChildProposal>> {
        self.expansions.fetch_add(1, Ordering::SeqCst);
        let count = self.child_count.unwrap_or(ctx.children_required);
        Ok((0..count)
            .map(|_| {
                let jobs = self.next_value.fetch_add(1, Ordering::SeqCst);
                ChildProposal {
                    option_deltas: vec![ConfigDelta::new("DBOptions")
                        .with("max_background_jobs", jobs.to_string())],
                    bench_delta: None,
                    reasoning: format!("try {jobs} background jobs"),
                }
            })
            .collect())
    }

    async fn propose_full_reconfig(&self, ctx: &ReconfigContext) -> Result<String> {
        self.reconfigs.fetch_add(1, Ordering::SeqCst);
        self.trace_summaries
            .lock()
            .unwrap()
            .push(ctx.trace_summary.clone());
        Ok(self.reconfig.clone())
    }

    async fn propose_live_patch(&self, _ctx: &LivePatchContext) -> Result<String> {
        self.live_patches.fetch_add(1, Ordering::SeqCst);
        self.live_patch
            .clone()
            .ok_or_else(|| TuneError::Oracle("no patch".to_string()))
    }

    async fn correct_config(&self, _ctx: &CorrectionContext) -> Result<ChildProposal> {
        self.corrections.fetch_add(1, Ordering::SeqCst);
        Ok(ChildProposal {
            option_deltas: vec![self.correction.clone()],
            bench_delta: None,
            reasoning: "drop the rejected option".to_string(),
        })
    }
}

/// Oracle that always picks the last leaf in level order
#[derive(Default)]
pub struct LastLeafOracle {
    pub selections: AtomicU32,
    pub reflections: AtomicU32,
}

#[async_trait]
impl Oracle for LastLeafOracle {
    async fn select_next(&self, tree_json: &str) -> Result<Selection> {
        self.selections.fetch_add(1, Ordering::SeqCst);
        let digests: Vec<serde_json::Value> = serde_json::from_str(tree_json)?;
        let id = digests
            .iter()
            .rev()
            .find(|d| d["has_children"] == false)
            .and_then(|d| d["unique_id"].as_u64())
            .unwrap_or(0);
        Ok(Selection {
            node_id: NodeId(id),
            reasoning: "deepest leaf".to_string(),
        })
    }

    async fn collect_insights(&self, _records: &[NodeDigest]) -> Result<Vec<Insight>> {
        Ok(vec![Insight {
            id: 0,
            content: "more background jobs help fillrandom".to_string(),
            property: InsightProperty::Positive,
            confidence: 0.7,
        }])
    }

    async fn reflect(&self, _records: &[NodeDigest], insights: &[Insight]) -> Result<Vec<InsightDecision>> {
        self.reflections.fetch_add(1, Ordering::SeqCst);
        Ok(insights
            .iter()
            .map(|i| InsightDecision::Upvote { id: i.id })
            .collect())
    }
}
