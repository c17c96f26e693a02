use super::*;
use crate::models::BenchmarkResult;
use crate::options::{BenchOptionsDelta, ConfigDelta};
use tempfile::TempDir;

fn node(reasoning: &str) -> SearchNode {
    SearchNode::new("[DBOptions]\n  max_background_jobs=2\n", vec!["--threads=4".into()], reasoning)
}

/// root -> (a -> (c, d), b)
fn sample_tree() -> (SearchTree, [NodeId; 4]) {
    let mut tree = SearchTree::new(node("root"), "fillrandom");
    let root = tree.root();
    let a = tree.add_child(root, node("a")).unwrap();
    let b = tree.add_child(root, node("b")).unwrap();
    let c = tree.add_child(a, node("c")).unwrap();
    let d = tree.add_child(a, node("d")).unwrap();
    (tree, [a, b, c, d])
}

#[test]
fn test_ids_are_unique_and_monotonic() {
    let (tree, [a, b, c, d]) = sample_tree();
    let ids = [tree.root(), a, b, c, d];
    for pair in ids.windows(2) {
        assert!(pair[0] < pair[1]);
    }
    assert_eq!(tree.len(), 5);
    assert_eq!(tree.get(tree.root()).unwrap().parent(), None);
    assert_eq!(tree.get(c).unwrap().parent(), Some(a));
}

#[test]
fn test_add_child_to_unknown_parent() {
    let (mut tree, _) = sample_tree();
    assert_eq!(tree.add_child(NodeId(99), node("orphan")), None);
    assert_eq!(tree.len(), 5);
}

#[test]
fn test_find_by_id() {
    let (tree, [_, _, c, _]) = sample_tree();
    assert_eq!(tree.find_by_id(c).unwrap().reasoning, "c");
    assert!(tree.find_by_id(NodeId(42)).is_none());
    assert!(tree.is_leaf(c));
    assert!(!tree.is_leaf(tree.root()));
    assert!(!tree.is_leaf(NodeId(42)));
}

#[test]
fn test_bfs_never_emits_child_before_parent() {
    let (tree, [a, b, c, d]) = sample_tree();
    assert_eq!(tree.bfs_order(), vec![tree.root(), a, b, c, d]);
    assert_eq!(tree.dfs_order(), vec![tree.root(), a, c, d, b]);

    let digests = tree.bfs_digests();
    for (i, digest) in digests.iter().enumerate() {
        if let Some(parent) = digest.parent_id {
            let parent_pos = digests.iter().position(|d| d.unique_id == parent).unwrap();
            assert!(parent_pos < i);
        }
    }
}

#[test]
fn test_digest_marks_missing_changes_as_fail() {
    let mut tree = SearchTree::new(node("root"), "readrandom");
    let child = tree
        .add_child(
            tree.root(),
            node("child").with_option_deltas(vec![
                ConfigDelta::new("DBOptions").with("max_background_jobs", "4")
            ]),
        )
        .unwrap();

    let json: serde_json::Value = serde_json::from_str(&tree.bfs_digests_json().unwrap()).unwrap();
    let root = &json[0];
    assert_eq!(root["database_option_changes_from_parent"], "FAIL");
    assert_eq!(root["database_benchmark_changes_from_parent"], "FAIL");
    assert_eq!(root["has_children"], true);
    assert_eq!(root["children_count"], 1);
    assert_eq!(root["benchmark_content"]["task_name"], "readrandom");
    assert!(root.get("database_option").is_none());

    let child_json = &json[1];
    assert_eq!(child_json["unique_id"], child.0);
    assert_eq!(
        child_json["database_option_changes_from_parent"][0]["section"],
        "DBOptions"
    );
}

#[test]
fn test_digest_is_idempotent() {
    let (mut tree, [a, ..]) = sample_tree();
    tree.record_result(a, BenchmarkResult::failed("open error"));
    tree.visit(a);

    let first = tree.bfs_digests_json().unwrap();
    let second = tree.bfs_digests_json().unwrap();
    assert_eq!(first, second);
    assert_eq!(tree.get(a).unwrap().visits(), 1);
}

#[test]
fn test_branch_reasons_are_numbered() {
    let (mut tree, [a, ..]) = sample_tree();
    assert!(tree.add_branch_reason(a, "high write amplification"));
    assert!(tree.add_branch_reason(a, "try larger memtables"));
    assert!(!tree.add_branch_reason(NodeId(77), "nope"));

    let reasons = tree.get(a).unwrap().branch_reasons();
    assert_eq!(reasons[0], "1st branching reason:\nhigh write amplification");
    assert!(reasons[1].starts_with("2nd branching reason:"));
}

#[test]
fn test_ordinals() {
    use super::node::ordinal;
    let cases = [(1, "1st"), (2, "2nd"), (3, "3rd"), (4, "4th"), (11, "11th"), (12, "12th"), (21, "21st"), (113, "113th")];
    for (n, expected) in cases {
        assert_eq!(ordinal(n), expected);
    }
}

#[test]
fn test_record_log_appends_full_tree() {
    let temp_dir = TempDir::new().unwrap();
    let log = temp_dir.path().join("records.jsonl");
    let (tree, [a, b, c, d]) = sample_tree();

    tree.append_record_log(&log).unwrap();
    let content = std::fs::read_to_string(&log).unwrap();
    let ids: Vec<u64> = content
        .lines()
        .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["unique_id"].as_u64().unwrap())
        .collect();
    assert_eq!(ids, vec![0, a.0, c.0, d.0, b.0]);

    let first_line: serde_json::Value = serde_json::from_str(content.lines().next().unwrap()).unwrap();
    assert!(first_line["database_option"].as_str().unwrap().contains("[DBOptions]"));

    // A second call duplicates every entry
    tree.append_record_log(&log).unwrap();
    assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 10);
}

#[test]
fn test_dump_round_trip_and_best_node() {
    let temp_dir = TempDir::new().unwrap();
    let dump = temp_dir.path().join("tree.json");
    let (mut tree, [a, b, ..]) = sample_tree();

    let ok = |ops: f64| BenchmarkResult {
        ops_per_sec: Some(ops),
        ..Default::default()
    };
    tree.record_result(a, ok(1000.0));
    tree.record_result(b, ok(1500.0));
    tree.get_mut(b).unwrap().bench_delta = Some(BenchOptionsDelta {
        cache_size: Some(1 << 20),
        ..Default::default()
    });

    assert_eq!(tree.best_node().unwrap().id(), b);

    tree.write_dump(&dump).unwrap();
    let loaded = SearchTree::load_dump(&dump).unwrap();
    assert_eq!(loaded.len(), tree.len());
    assert_eq!(loaded.task_name(), "fillrandom");
    assert_eq!(loaded.best_node().unwrap().id(), b);
    assert_eq!(loaded.get(a).unwrap().children(), tree.get(a).unwrap().children());
}
