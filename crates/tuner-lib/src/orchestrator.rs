//! Search loop over configurations
//!
//! Each iteration expands the frontier into proposals, benchmarks every new
//! child and lets the oracle choose where to continue. After the last
//! iteration the tree is persisted and the insight memory is refined.

use crate::context::TuneContext;
use crate::error::{Result, TuneError};
use crate::insights::{append_insights, Insight, InsightMemory};
use crate::models::BenchmarkResult;
use crate::options::apply_deltas;
use crate::oracle::{ExpansionContext, Oracle, Proposer, Selection};
use crate::progress::Phase;
use crate::runner::{BenchmarkRunner, EvaluationRequest};
use crate::search::{NodeId, SearchNode, SearchTree};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Summary of a finished search
#[derive(Debug, Clone, Serialize)]
pub struct SearchReport {
    /// Node the oracle chose in the final selection
    pub selected: Option<Selection>,
    /// Node with the highest measured throughput
    pub best_node: Option<NodeId>,
    pub best_ops_per_sec: Option<f64>,
    pub best_options: Option<String>,
    pub nodes: usize,
    pub iterations: usize,
    pub evaluations: usize,
    pub failed_evaluations: usize,
    pub contract_violations: Vec<String>,
    pub insights_added: usize,
}

pub struct SearchOrchestrator {
    ctx: TuneContext,
    runner: BenchmarkRunner,
    proposer: Arc<dyn Proposer>,
    oracle: Arc<dyn Oracle>,
    memory: InsightMemory,
    tree: SearchTree,
    frontier: NodeId,
    evaluations: usize,
    failed_evaluations: usize,
    violations: Vec<String>,
}

impl SearchOrchestrator {
    pub fn new(
        ctx: TuneContext,
        runner: BenchmarkRunner,
        proposer: Arc<dyn Proposer>,
        oracle: Arc<dyn Oracle>,
        memory: InsightMemory,
        root: SearchNode,
        task_name: impl Into<String>,
    ) -> Self {
        let tree = SearchTree::new(root, task_name);
        let frontier = tree.root();
        Self {
            ctx,
            runner,
            proposer,
            oracle,
            memory,
            tree,
            frontier,
            evaluations: 0,
            failed_evaluations: 0,
            violations: Vec::new(),
        }
    }

    pub fn tree(&self) -> &SearchTree {
        &self.tree
    }

    pub fn frontier(&self) -> NodeId {
        self.frontier
    }

    pub fn memory(&self) -> &InsightMemory {
        &self.memory
    }

    /// Seed the root with a known result instead of benchmarking it
    pub fn with_root_result(mut self, result: BenchmarkResult) -> Self {
        let root = self.tree.root();
        self.tree.record_result(root, result);
        self.tree.visit(root);
        self
    }

    /// Run every iteration, the final selection and the persistence pass
    pub async fn run(&mut self) -> Result<SearchReport> {
        let iterations = self.ctx.settings.search.iterations;
        self.ctx
            .progress
            .update(|s| {
                s.total_iterations = iterations;
                s.frontier = Some(self.frontier);
            })
            .await;

        match self.search(iterations).await {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(error = %e, "Search aborted");
                let message = e.to_string();
                self.ctx
                    .progress
                    .update(|s| {
                        s.phase = Phase::Failed;
                        s.message = Some(message);
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn search(&mut self, iterations: usize) -> Result<SearchReport> {
        let root = self.tree.root();
        if self.tree.get(root).is_some_and(|n| n.visits() == 0) {
            self.evaluate_node(root, None).await?;
        }

        for iteration in 0..iterations {
            info!(iteration, frontier = %self.frontier, "Starting search iteration");
            self.ctx.progress.update(|s| s.iteration = iteration + 1).await;

            if self.tree.is_leaf(self.frontier) {
                self.ctx.progress.set_phase(Phase::Expanding).await;
                match self.expand(self.frontier).await {
                    Ok(children) => {
                        info!(frontier = %self.frontier, children = children.len(), "Expanded node");
                    }
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(TuneError::ProposerContractViolation(detail)) => {
                        self.record_violation(detail).await;
                    }
                    Err(e) => warn!(error = %e, frontier = %self.frontier, "Expansion failed"),
                }
            }

            self.ctx.progress.set_phase(Phase::Evaluating).await;
            self.evaluate_children(self.frontier).await?;

            self.ctx.progress.set_phase(Phase::Selecting).await;
            if let Some(selection) = self.select().await {
                self.move_frontier(selection);
            }
            self.sync_progress().await;
        }

        let selected = self.select().await;
        if let Some(selection) = &selected {
            if self.tree.find_by_id(selection.node_id).is_none() {
                warn!(node_id = %selection.node_id, "Final selection names an unknown node");
            }
        }

        self.persist()?;

        let insights_added = if self.ctx.settings.search.reflect {
            self.ctx.progress.set_phase(Phase::Reflecting).await;
            self.reflect().await
        } else {
            0
        };

        let best = self.tree.best_node();
        let report = SearchReport {
            selected,
            best_node: best.map(|n| n.id()),
            best_ops_per_sec: best.and_then(|n| n.ops_per_sec()),
            best_options: best.map(|n| n.options.clone()),
            nodes: self.tree.len(),
            iterations,
            evaluations: self.evaluations,
            failed_evaluations: self.failed_evaluations,
            contract_violations: self.violations.clone(),
            insights_added,
        };

        self.ctx
            .logger
            .log_orchestration_finished(report.best_node, report.best_ops_per_sec, report.nodes);
        self.sync_progress().await;
        self.ctx.progress.set_phase(Phase::Finished).await;
        Ok(report)
    }

    /// Attach exactly `children_per_expansion` proposals under a leaf
    ///
    /// Nothing is attached when the proposer returns any other count.
    pub async fn expand(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let required = self.ctx.settings.search.children_per_expansion;
        let node = self
            .tree
            .get(id)
            .ok_or_else(|| TuneError::Oracle(format!("node {id} is not in the tree")))?;

        let ctx = ExpansionContext {
            node_id: id,
            options: node.options.clone(),
            bench_args: node.bench_args.clone(),
            result: node.result().cloned(),
            children_required: required,
            insights: self.memory.top_k(self.ctx.settings.search.insights_top_k),
        };
        let proposals = self.proposer.propose_children(&ctx).await?;
        if proposals.len() != required {
            return Err(TuneError::wrong_child_count(required, proposals.len()));
        }

        let mut children = Vec::with_capacity(required);
        for proposal in proposals {
            let options = apply_deltas(&ctx.options, &proposal.option_deltas);
            let bench_args = match &proposal.bench_delta {
                Some(delta) => delta.apply_to_args(&ctx.bench_args),
                None => ctx.bench_args.clone(),
            };

            let mut child = SearchNode::new(options, bench_args, proposal.reasoning)
                .with_option_deltas(proposal.option_deltas);
            if let Some(delta) = proposal.bench_delta {
                child = child.with_bench_delta(delta);
            }
            if let Some(child_id) = self.tree.add_child(id, child) {
                children.push(child_id);
            }
        }

        self.ctx.metrics.set_search_nodes(self.tree.len());
        Ok(children)
    }

    async fn record_violation(&mut self, detail: String) {
        self.ctx.logger.log_contract_violation(self.frontier, &detail);
        self.ctx.metrics.inc_contract_violations();
        self.violations.push(detail);
        let count = self.violations.len();
        self.ctx.progress.update(|s| s.contract_violations = count).await;
    }

    /// Benchmark unvisited children; visited ones only gain a visit
    async fn evaluate_children(&mut self, parent: NodeId) -> Result<()> {
        let Some(node) = self.tree.get(parent) else {
            return Ok(());
        };
        let baseline = node.ops_per_sec();
        let children = node.children().to_vec();

        for child in children {
            let visited = self.tree.get(child).is_some_and(|n| n.visits() > 0);
            if visited {
                self.tree.visit(child);
            } else {
                self.evaluate_node(child, baseline).await?;
            }
        }
        Ok(())
    }

    async fn evaluate_node(&mut self, id: NodeId, baseline: Option<f64>) -> Result<()> {
        let Some(node) = self.tree.get(id) else {
            return Ok(());
        };
        let request = EvaluationRequest {
            node: id,
            options: node.options.clone(),
            bench_args: node.bench_args.clone(),
            reasoning: node.reasoning.clone(),
            baseline_throughput: baseline,
        };
        self.ctx.progress.update(|s| s.evaluating = Some(id)).await;

        let result = match self.runner.evaluate(&request).await {
            Ok(evaluation) => {
                if evaluation.is_error {
                    self.failed_evaluations += 1;
                }
                self.tree.set_options_path(id, evaluation.options_path);
                if let Some(node) = self.tree.get_mut(id) {
                    node.options = evaluation.options;
                }
                evaluation.result
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(node_id = %id, error = %e, "Evaluation did not finish");
                self.failed_evaluations += 1;
                BenchmarkResult::failed(e.to_string())
            }
        };

        self.evaluations += 1;
        self.tree.record_result(id, result);
        self.tree.visit(id);
        self.ctx.progress.update(|s| s.evaluating = None).await;
        Ok(())
    }

    async fn select(&self) -> Option<Selection> {
        let json = match self.tree.bfs_digests_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Could not serialize tree for selection");
                return None;
            }
        };
        match self.oracle.select_next(&json).await {
            Ok(selection) => Some(selection),
            Err(e) => {
                warn!(error = %e, "Oracle selection failed, keeping frontier");
                None
            }
        }
    }

    fn move_frontier(&mut self, selection: Selection) {
        let target = selection.node_id;
        if self.tree.find_by_id(target).is_none() {
            warn!(node_id = %target, frontier = %self.frontier, "Oracle chose an unknown node, keeping frontier");
            return;
        }

        self.tree.visit(target);
        self.tree.add_branch_reason(target, &selection.reasoning);
        self.ctx
            .logger
            .log_node_selected(target, self.frontier, &selection.reasoning);
        self.frontier = target;
    }

    async fn sync_progress(&self) {
        let best = self.tree.best_node();
        let best_node = best.map(|n| n.id());
        let best_ops = best.and_then(|n| n.ops_per_sec());
        let nodes = self.tree.len();
        let frontier = self.frontier;
        self.ctx.metrics.set_search_nodes(nodes);
        self.ctx
            .progress
            .update(|s| {
                s.frontier = Some(frontier);
                s.best_node = best_node;
                s.best_ops_per_sec = best_ops;
                s.nodes = nodes;
            })
            .await;
    }

    fn persist(&self) -> Result<()> {
        let search = &self.ctx.settings.search;
        ensure_parent(&search.record_log)?;
        self.tree.append_record_log(&search.record_log)?;
        ensure_parent(&search.tree_dump)?;
        self.tree.write_dump(&search.tree_dump)?;
        info!(
            record_log = %search.record_log.display(),
            tree_dump = %search.tree_dump.display(),
            "Search tree persisted"
        );
        Ok(())
    }

    /// Refine or seed the insight memory; returns how many insights were added
    async fn reflect(&mut self) -> usize {
        let records = self.tree.records();

        let added: Vec<Insight> = if self.memory.is_empty() {
            match self.oracle.collect_insights(&records).await {
                Ok(fresh) => fresh
                    .into_iter()
                    .filter_map(|i| {
                        let id = self.memory.add(i.content, i.property);
                        self.memory.get(id).cloned()
                    })
                    .collect(),
                Err(e) => {
                    warn!(error = %e, "Insight collection failed");
                    return 0;
                }
            }
        } else {
            match self.oracle.reflect(&records, self.memory.all()).await {
                Ok(decisions) => self.memory.apply(&decisions),
                Err(e) => {
                    warn!(error = %e, "Insight reflection failed");
                    return 0;
                }
            }
        };

        let search = &self.ctx.settings.search;
        let persisted = ensure_parent(&search.positive_insights)
            .and_then(|_| ensure_parent(&search.negative_insights))
            .and_then(|_| append_insights(&added, &search.positive_insights, &search.negative_insights));
        if let Err(e) = persisted {
            warn!(error = %e, "Could not append insights");
        }

        info!(added = added.len(), total = self.memory.len(), "Insight memory refined");
        added.len()
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(std::fs::create_dir_all(parent)?),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{DbBenchExtractor, MetricsExtractor};
    use crate::insights::InsightProperty;
    use crate::resource::DirectHelper;
    use crate::settings::TunerSettings;
    use crate::supervisor::{BenchmarkCommand, BenchmarkSupervisor};
    use crate::testing::{
        summary, test_context, test_settings, LastLeafOracle, ScriptedLauncher, ScriptedProposer, BASE_OPTIONS,
    };
    use crate::trace::NullTraceAnalyzer;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        settings: TunerSettings,
        launcher: Arc<ScriptedLauncher>,
        proposer: Arc<ScriptedProposer>,
        oracle: Arc<LastLeafOracle>,
    }

    impl Fixture {
        fn new(proposer: ScriptedProposer) -> Self {
            let dir = TempDir::new().unwrap();
            let mut settings = test_settings(dir.path());
            settings.search.iterations = 2;
            Self {
                settings,
                _dir: dir,
                launcher: Arc::new(ScriptedLauncher::default().with_fallback(vec![summary(1000)])),
                proposer: Arc::new(proposer),
                oracle: Arc::new(LastLeafOracle::default()),
            }
        }

        fn orchestrator(&self, memory: InsightMemory) -> SearchOrchestrator {
            let ctx = test_context(self.settings.clone());
            let extractor: Arc<dyn MetricsExtractor> = Arc::new(DbBenchExtractor);
            let supervisor = BenchmarkSupervisor::new(
                ctx.clone(),
                Arc::new(DirectHelper),
                self.launcher.clone(),
                extractor.clone(),
                self.proposer.clone(),
                Arc::new(NullTraceAnalyzer),
            );
            let runner = BenchmarkRunner::new(
                ctx.clone(),
                supervisor,
                extractor,
                self.proposer.clone(),
                BenchmarkCommand::new("db_bench", "/unused", "fillrandom"),
            );
            SearchOrchestrator::new(
                ctx,
                runner,
                self.proposer.clone(),
                self.oracle.clone(),
                memory,
                SearchNode::new(BASE_OPTIONS, vec!["--num=1000".to_string()], "initial configuration"),
                "fillrandom",
            )
        }
    }

    #[tokio::test]
    async fn test_wrong_child_count_attaches_nothing() {
        let fixture = Fixture::new(ScriptedProposer {
            child_count: Some(2),
            ..Default::default()
        });
        let mut orchestrator = fixture.orchestrator(InsightMemory::new());

        let err = orchestrator.expand(NodeId(0)).await.unwrap_err();

        assert!(matches!(err, TuneError::ProposerContractViolation(_)));
        assert_eq!(err.to_string(), "proposer contract violation: expected exactly 3 children, got 2");
        assert_eq!(orchestrator.tree().len(), 1);
        assert!(orchestrator.tree().is_leaf(NodeId(0)));
    }

    #[tokio::test]
    async fn test_expansion_applies_deltas() {
        let fixture = Fixture::new(ScriptedProposer::default());
        let mut orchestrator = fixture.orchestrator(InsightMemory::new());

        let children = orchestrator.expand(NodeId(0)).await.unwrap();

        assert_eq!(children, vec![NodeId(1), NodeId(2), NodeId(3)]);
        let first = orchestrator.tree().get(NodeId(1)).unwrap();
        assert!(first.options.contains("  max_background_jobs=3"));
        assert!(first.options.contains("  max_open_files=-1"));
        assert_eq!(first.bench_args, vec!["--num=1000"]);
        assert_eq!(first.parent(), Some(NodeId(0)));
    }

    #[tokio::test]
    async fn test_violation_is_reported_and_search_continues() {
        let fixture = Fixture::new(ScriptedProposer {
            child_count: Some(2),
            ..Default::default()
        });
        let mut orchestrator = fixture.orchestrator(InsightMemory::new());

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.contract_violations.len(), 2);
        assert_eq!(report.nodes, 1);
        // Only the root was benchmarked
        assert_eq!(report.evaluations, 1);
        assert_eq!(report.best_node, Some(NodeId(0)));
        assert_eq!(fixture.oracle.selections.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_full_search_loop() {
        let fixture = Fixture::new(ScriptedProposer::default());
        let mut orchestrator = fixture
            .orchestrator(InsightMemory::new())
            .with_root_result(DbBenchExtractor.extract(&summary(900)));

        let report = orchestrator.run().await.unwrap();

        // Two expansions of three children each under root, then under node 3
        assert_eq!(report.nodes, 7);
        assert_eq!(report.evaluations, 6);
        assert_eq!(report.failed_evaluations, 0);
        assert!(report.contract_violations.is_empty());
        assert_eq!(fixture.proposer.expansions.load(Ordering::SeqCst), 2);
        assert_eq!(fixture.launcher.launch_count(), 6);

        let tree = orchestrator.tree();
        assert_eq!(tree.get(NodeId(4)).unwrap().parent(), Some(NodeId(3)));
        assert_eq!(orchestrator.frontier(), NodeId(6));
        assert_eq!(
            tree.get(NodeId(3)).unwrap().branch_reasons(),
            ["1st branching reason:\ndeepest leaf"]
        );
        // Evaluated once, selected once
        assert_eq!(tree.get(NodeId(3)).unwrap().visits(), 2);
        assert!(tree
            .get(NodeId(1))
            .unwrap()
            .options_path
            .as_ref()
            .unwrap()
            .ends_with("output/1.ini"));

        let log = std::fs::read_to_string(&fixture.settings.search.record_log).unwrap();
        assert_eq!(log.lines().count(), 7);
        let dump = SearchTree::load_dump(&fixture.settings.search.tree_dump).unwrap();
        assert_eq!(dump.len(), 7);

        // Empty memory: fresh insights are collected and logged
        assert_eq!(report.insights_added, 1);
        assert_eq!(orchestrator.memory().len(), 1);
        let positive = std::fs::read_to_string(&fixture.settings.search.positive_insights).unwrap();
        assert_eq!(positive.lines().count(), 1);

        let snapshot = orchestrator.ctx.progress.snapshot().await;
        assert_eq!(snapshot.phase, Phase::Finished);
        assert_eq!(snapshot.nodes, 7);
    }

    #[tokio::test]
    async fn test_reflection_votes_on_existing_insights() {
        let fixture = Fixture::new(ScriptedProposer::default());
        let mut memory = InsightMemory::new();
        let id = memory.add("smaller write buffers hurt", InsightProperty::Negative);
        let mut orchestrator = fixture.orchestrator(memory);

        let report = orchestrator.run().await.unwrap();

        assert_eq!(report.insights_added, 0);
        assert_eq!(fixture.oracle.reflections.load(Ordering::SeqCst), 1);
        let insight = orchestrator.memory().get(id).unwrap();
        assert!((insight.confidence - 0.8).abs() < 1e-9);
    }
}
