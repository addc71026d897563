mod common;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use chrono::{Duration, Utc};
use common::*;
use rlmon_server::app;
use rlmon_server::metrics::PrometheusExporter;
use rlmon_server::monitor::{MonitorPipeline, MonitorScheduler, PipelineDeps};
use rlmon_server::state::AppState;
use rlmon_storage::MemoryStore;
use serde_json::Value;
use std::sync::Arc;
use tower::util::ServiceExt;

struct TestContext {
    directory: Arc<FakeDirectory>,
    scheduler: MonitorScheduler,
    app: axum::Router,
}

fn build_test_context() -> TestContext {
    let store = Arc::new(MemoryStore::new());
    let directory = Arc::new(FakeDirectory::with_policies(vec![policy(ENDPOINT)]));
    let exporter = Arc::new(PrometheusExporter::new().unwrap());
    let pipeline = Arc::new(MonitorPipeline::new(
        PipelineDeps {
            policies: store.clone(),
            states: store.clone(),
            alerts: store,
            directory: directory.clone(),
            publisher: Arc::new(RecordingPublisher::default()),
            metrics: exporter.clone(),
        },
        fast_settings(),
    ));
    let scheduler = MonitorScheduler::new(pipeline.clone(), 300);
    let state = AppState {
        start_time: Utc::now() - Duration::seconds(30),
        exporter,
        last_report: scheduler.last_report(),
        phase: pipeline.subscribe(),
    };
    TestContext {
        directory,
        scheduler,
        app: app::build_http_app(state),
    }
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, String, Option<String>) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8_lossy(&body).into_owned(), content_type)
}

#[tokio::test]
async fn health_reports_starting_before_first_tick() {
    let ctx = build_test_context();
    let (status, body, _) = get(&ctx.app, "/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "starting");
    assert_eq!(json["phase"], "idle");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert!(json["uptime_secs"].as_i64().unwrap() >= 30);
    assert!(json["last_tick"].is_null());
}

#[tokio::test]
async fn health_includes_last_tick_report() {
    let ctx = build_test_context();
    ctx.directory.set_level(ENDPOINT, 3000, base_time());
    let report = ctx.scheduler.run_once().await;
    assert!(report.succeeded());

    let (_, body, _) = get(&ctx.app, "/health").await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert_eq!(json["last_tick"]["outcome"]["status"], "succeeded");
    assert_eq!(json["last_tick"]["critical_count"], 1);
    assert_eq!(json["last_tick"]["alerts_created"], 1);
    assert_eq!(json["last_tick"]["stages"].as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn health_reports_failing_tick() {
    let ctx = build_test_context();
    ctx.directory.fail_list(&[Failure::PermissionDenied]);
    ctx.scheduler.run_once().await;

    let (_, body, _) = get(&ctx.app, "/health").await;
    let json: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "failing");
    assert_eq!(json["last_tick"]["outcome"]["stage"], "fetch");
}

#[tokio::test]
async fn metrics_endpoint_exposes_gauges_and_counters() {
    let ctx = build_test_context();
    ctx.directory.set_level(ENDPOINT, 3000, base_time());
    ctx.scheduler.run_once().await;

    let (status, body, content_type) = get(&ctx.app, "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/plain; version=0.0.4"));
    assert!(body.contains(r#"rlmon_available_tokens{endpoint_id="entries.get",psp_category="B"} 3000"#));
    assert!(body.contains(
        r#"rlmon_alerts_created_total{endpoint_id="entries.get",psp_category="B",severity="CRITICAL"} 1"#
    ));
    assert!(body.contains(r#"rlmon_monitoring_duration_seconds_count{operation="classify"} 1"#));
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let ctx = build_test_context();
    let (status, _, _) = get(&ctx.app, "/alerts").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
