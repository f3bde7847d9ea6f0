use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use chrono::Utc;
use tempfile::TempDir;
use tower::util::ServiceExt;
use upupup_common::Config;
use upupup_server::readiness::initialise_scrape_config;
use upupup_server::state::AppState;
use upupup_server::app::build_router;
use upupup_storage::{CheckRun, Options, Store};

struct TestContext {
    _dirs: Vec<TempDir>,
    store: Arc<Store>,
    app: axum::Router,
    prom_path: std::path::PathBuf,
}

fn base_config(temp_dir: &TempDir, extra: &str) -> String {
    let prom_path = temp_dir.path().join("prometheus.yml");
    format!(
        r#"
service:
  name: edge
  defaults:
    interval: 30s
    timeout: 2s
server:
  listen: ":8080"
  health:
    allow_no_notifications: true
  prometheus:
    config_path: {prom}
    targets: [monitor.example:8080]
hooks:
  - id: pause-ms-portal
    description: Pause portal alerts
    action:
      kind: pause_notifications
      scope: check
      target_ids: [api-health]
      duration: 5m
      max_duration: 1h
  - id: locked-down
    allowed_ips: ["10.0.0.0/8"]
    action:
      kind: pause_notifications
      scope: global
checks:
  - id: api-health
    name: API health
    type: http
    target: https://example.com/health
    labels:
      team: platform
  - id: metrics-check
    name: Node metrics
    type: metrics
    target: node-1
    metrics:
      thresholds:
        - name: node_load1
          op: "<"
          value: 4
{extra}
"#,
        prom = prom_path.display(),
        extra = extra,
    )
}

fn build_context_with(config: &str) -> TestContext {
    let temp_dir = TempDir::new().expect("tempdir");
    let parsed = Config::parse(config).expect("config parses");
    let prom_path = std::path::PathBuf::from(parsed.server.prometheus.config_path.clone());
    let store = Arc::new(
        Store::open(temp_dir.path().join("upupup.db"), Options::default()).expect("store opens"),
    );
    let state = AppState::new(parsed, store.clone()).expect("state builds");
    initialise_scrape_config(&state);
    let app = build_router(state);
    TestContext {
        _dirs: vec![temp_dir],
        store,
        app,
        prom_path,
    }
}

fn build_context() -> TestContext {
    let temp_dir = TempDir::new().expect("tempdir");
    let rendered = base_config(&temp_dir, "");
    let mut ctx = build_context_with(&rendered);
    // keep the directory holding the generated scrape config alive
    ctx._dirs.push(temp_dir);
    ctx
}

async fn request(
    app: &axum::Router,
    method: &str,
    path: &str,
    body: Option<&str>,
    headers: &[(&str, &str)],
) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(path);
    for (key, value) in headers {
        builder = builder.header(*key, *value);
    }
    let body = match body {
        Some(content) => Body::from(content.to_string()),
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(builder.body(body).expect("request builds"))
        .await
        .expect("request succeeds");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body reads");
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

fn record_run(store: &Store, check_id: &str, success: bool) {
    store
        .record_check_run(&CheckRun {
            check_id: check_id.to_string(),
            check_name: format!("{check_id} name"),
            success,
            summary: if success { "Check succeeded".into() } else { "boom".into() },
            error: String::new(),
            latency: Duration::from_millis(12),
            occurred_at: Utc::now(),
        })
        .expect("run records");
}

#[tokio::test]
async fn readiness_reports_ok_after_generation() {
    let ctx = build_context();
    let (status, body) = request(&ctx.app, "GET", "/readiness", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["configuration"]["last_generated"].is_string());

    let written = std::fs::read_to_string(&ctx.prom_path).expect("scrape config written");
    assert!(written.contains("job_name: upupup_checks"));
    assert!(written.contains("check_id: api-health"));
    assert!(written.contains("check_id: metrics-check"));
    assert!(written.contains("replacement: /api/metrics/$1"));
    assert!(written.contains("monitor.example:8080"));
    // api-health sorts before metrics-check
    let api_pos = written.find("check_id: api-health").unwrap();
    let metrics_pos = written.find("check_id: metrics-check").unwrap();
    assert!(api_pos < metrics_pos);
}

#[tokio::test]
async fn readiness_is_unready_without_config_path() {
    let temp_dir = TempDir::new().unwrap();
    let config = base_config(&temp_dir, "").replace(
        &format!("config_path: {}", temp_dir.path().join("prometheus.yml").display()),
        "config_path: \"\"",
    );
    let ctx = build_context_with(&config);
    let (status, body) = request(&ctx.app, "GET", "/readiness", None, &[]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("not configured") || body.contains("not generated"));
}

#[tokio::test]
async fn hook_invocation_persists_and_responds_202() {
    let ctx = build_context();
    let (status, body) = request(
        &ctx.app,
        "POST",
        "/api/hook/pause-ms-portal",
        Some(r#"{"duration":"10m","note":"deploy window","requested_by":"alice"}"#),
        &[("content-type", "application/json")],
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "accepted");
    assert_eq!(json["hook_id"], "pause-ms-portal");
    assert_eq!(json["kind"], "pause_notifications");
    assert_eq!(json["scope"], "check");
    assert_eq!(json["target_ids"], serde_json::json!(["api-health"]));
    assert_eq!(json["duration_seconds"], 600);
    assert_eq!(json["requested_by"], "alice");
    assert!(json["active_until"].is_string());

    let active = ctx.store.active_hook_executions(Utc::now()).unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].hook_id, "pause-ms-portal");
    assert_eq!(active[0].note, "deploy window");
}

#[tokio::test]
async fn hook_duration_defaults_to_config_value() {
    let ctx = build_context();
    let (status, body) =
        request(&ctx.app, "POST", "/api/hook/pause-ms-portal", None, &[]).await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["duration_seconds"], 300);
}

#[tokio::test]
async fn unknown_hook_is_404_and_bad_json_is_400() {
    let ctx = build_context();
    let (status, _) = request(&ctx.app, "POST", "/api/hook/nope", None, &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = request(
        &ctx.app,
        "POST",
        "/api/hook/pause-ms-portal",
        Some("{not json"),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("invalid json payload"));

    let (status, body) = request(
        &ctx.app,
        "POST",
        "/api/hook/pause-ms-portal",
        Some(r#"{"duration":"soon"}"#),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("invalid duration"));
}

#[tokio::test]
async fn per_hook_allowlist_is_enforced() {
    let ctx = build_context();
    let (status, _) = request(
        &ctx.app,
        "POST",
        "/api/hook/locked-down",
        None,
        &[("x-forwarded-for", "203.0.113.7")],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &ctx.app,
        "POST",
        "/api/hook/locked-down",
        None,
        &[("x-forwarded-for", "10.3.4.5")],
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn global_allowlist_rejects_unlisted_addresses() {
    let temp_dir = TempDir::new().unwrap();
    let config = base_config(&temp_dir, "").replace(
        "server:\n  listen: \":8080\"",
        "server:\n  listen: \":8080\"\n  allowed_ips: [\"10.0.0.0/8\"]",
    );
    let ctx = build_context_with(&config);

    let (status, _) = request(
        &ctx.app,
        "GET",
        "/healthcheck",
        None,
        &[("x-forwarded-for", "203.0.113.7")],
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = request(
        &ctx.app,
        "GET",
        "/healthcheck",
        None,
        &[("x-forwarded-for", "10.1.1.1")],
    )
    .await;
    assert_ne!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn ingest_stores_snapshot_and_validates_input() {
    let ctx = build_context();

    let (status, body) = request(
        &ctx.app,
        "POST",
        "/api/ingest/node-1",
        Some("node_load1 0.5\n"),
        &[("content-type", "text/plain; version=0.0.4")],
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "{body}");
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "stored");
    assert_eq!(json["node_id"], "node-1");
    assert!(json["ingested_at"].is_string());

    let snapshot = ctx.store.latest_node_metrics("node-1").unwrap().unwrap();
    assert_eq!(snapshot.payload, "node_load1 0.5");

    let (status, _) = request(&ctx.app, "POST", "/api/ingest/node-1", Some("   "), &[]).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = request(
        &ctx.app,
        "POST",
        "/api/ingest/node-1",
        Some("x 1"),
        &[("content-encoding", "zstd")],
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("unsupported content encoding"));
}

#[tokio::test]
async fn ingest_accepts_gzip() {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let ctx = build_context();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(b"node_load1 0.25\n").unwrap();
    let compressed = encoder.finish().unwrap();

    let response = ctx
        .app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/ingest/node-9")
                .header("content-encoding", "gzip")
                .body(Body::from(compressed))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let snapshot = ctx.store.latest_node_metrics("node-9").unwrap().unwrap();
    assert_eq!(snapshot.payload, "node_load1 0.25");
}

#[tokio::test]
async fn metrics_endpoint_renders_gauges_and_raw_payload() {
    let ctx = build_context();
    record_run(&ctx.store, "metrics-check", true);

    let (status, _) = request(
        &ctx.app,
        "POST",
        "/api/ingest/node-1",
        Some("node_load1 0.5\n"),
        &[],
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, body) = request(&ctx.app, "GET", "/api/metrics/metrics-check", None, &[]).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.contains("upupup_check_status{check_id=\"metrics-check\""));
    assert!(body.contains("upupup_check_recent_total"));
    assert!(body.contains("upupup_check_recent_failures"));
    assert!(body.contains("node_load1{check_id=\"node-1\"} 0.5"));
    assert!(body.contains("# Raw metrics from node node-1 (ingested_at="));

    // legacy path serves the same payload
    let (status, legacy) = request(&ctx.app, "GET", "/api/data/metrics-check", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(legacy.contains("upupup_check_status"));
}

#[tokio::test]
async fn metrics_endpoint_handles_missing_data() {
    let ctx = build_context();

    let (status, _) = request(&ctx.app, "GET", "/api/metrics/unknown", None, &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = request(&ctx.app, "GET", "/api/metrics/api-health", None, &[]).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("no check data available"));
}

#[tokio::test]
async fn metrics_labels_are_sanitized_and_sorted() {
    let ctx = build_context();
    record_run(&ctx.store, "api-health", false);
    let (status, body) = request(&ctx.app, "GET", "/api/metrics/api-health", None, &[]).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("check_name=\"API health\""));
    assert!(body.contains("team=\"platform\""));
    assert!(body.contains("upupup_check_status{check_id=\"api-health\",check_name=\"API health\",team=\"platform\"} 0"));
}

#[tokio::test]
async fn healthcheck_reflects_check_recency() {
    let ctx = build_context();

    // no history for either check: warn -> 503
    let (status, body) = request(&ctx.app, "GET", "/healthcheck", None, &[]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "warn");
    assert_eq!(json["database"]["status"], "ok");

    record_run(&ctx.store, "api-health", true);
    record_run(&ctx.store, "metrics-check", true);

    let (status, body) = request(&ctx.app, "GET", "/healthcheck", None, &[]).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["status"], "ok");

    // a failing latest run degrades the check to warn
    record_run(&ctx.store, "api-health", false);
    let (status, body) = request(&ctx.app, "GET", "/healthcheck", None, &[]).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let api = json["checks"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["check_id"] == "api-health")
        .unwrap();
    assert_eq!(api["status"], "warn");
    assert!(api["detail"].as_str().unwrap().contains("last run failed"));
}

#[tokio::test]
async fn healthcheck_lists_active_hooks() {
    let ctx = build_context();
    record_run(&ctx.store, "api-health", true);
    record_run(&ctx.store, "metrics-check", true);
    let (status, _) =
        request(&ctx.app, "POST", "/api/hook/pause-ms-portal", None, &[]).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, body) = request(&ctx.app, "GET", "/healthcheck", None, &[]).await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let hooks = json["hooks"].as_array().unwrap();
    assert_eq!(hooks.len(), 1);
    assert_eq!(hooks[0]["hook_id"], "pause-ms-portal");
    assert_eq!(hooks[0]["kind"], "pause_notifications");
}
