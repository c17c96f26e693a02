//! Integration tests for the status and metrics endpoints

#[path = "../src/api.rs"]
#[allow(dead_code)]
mod api;

use api::{create_router, AppState};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use std::sync::Arc;
use tower::ServiceExt;
use tuner_lib::search::NodeId;
use tuner_lib::{Phase, ProgressBoard, TunerMetrics};

fn setup_test_app() -> (Router, ProgressBoard) {
    let progress = ProgressBoard::new();
    let router = create_router(Arc::new(AppState::new(progress.clone())));
    (router, progress)
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_healthz_returns_ok_while_searching() {
    let (app, progress) = setup_test_app();
    progress.set_phase(Phase::Evaluating).await;

    let (status, body) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "evaluating");
}

#[tokio::test]
async fn test_healthz_returns_503_after_failure() {
    let (app, progress) = setup_test_app();
    progress
        .update(|s| {
            s.phase = Phase::Failed;
            s.message = Some("failed to launch benchmark `db_bench`".to_string());
        })
        .await;

    let (status, body) = get_json(app, "/healthz").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["phase"], "failed");
    assert!(body["message"].as_str().unwrap().contains("db_bench"));
}

#[tokio::test]
async fn test_status_returns_progress_snapshot() {
    let (app, progress) = setup_test_app();
    progress
        .update(|s| {
            s.iteration = 2;
            s.total_iterations = 3;
            s.frontier = Some(NodeId(3));
            s.best_node = Some(NodeId(5));
            s.best_ops_per_sec = Some(125000.0);
            s.nodes = 7;
        })
        .await;

    let (status, body) = get_json(app, "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["iteration"], 2);
    assert_eq!(body["frontier"], 3);
    assert_eq!(body["best_node"], 5);
    assert_eq!(body["best_ops_per_sec"], 125000.0);
    assert_eq!(body["nodes"], 7);
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_tuner_metrics() {
    let (app, _progress) = setup_test_app();
    let metrics = TunerMetrics::new();
    metrics.inc_resets();
    metrics.set_search_nodes(4);

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("db_tuner_benchmark_resets_total"));
    assert!(text.contains("db_tuner_search_nodes 4"));
}

#[tokio::test]
async fn test_unknown_route_returns_404() {
    let (app, _progress) = setup_test_app();

    let response = app
        .oneshot(Request::builder().uri("/unknown").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
