use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use http_body_util::BodyExt;
use modelgate_core::catalog::{ModelCatalog, ModelSpec};
use modelgate_core::config::Config;
use modelgate_core::ledger::Ledger;
use modelgate_server::controller::{MemoryController, ProcessController};
use modelgate_server::state::AppState;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    app: axum::Router,
    ctl: Arc<MemoryController>,
    ledger: Arc<Ledger>,
}

/// Router over an in-memory supervisor knowing `qwen` (port 8101),
/// `llama` (port 8102) and `noport`.
fn harness(ctl: MemoryController) -> Harness {
    let catalog = ModelCatalog::new([
        spec("qwen", Some(8101)),
        spec("llama", Some(8102)),
        spec("noport", None),
    ]);
    let mut config = Config::default();
    config.gate.poll_interval_ms = 1000;
    config.gate.ready_timeout_secs = 5;
    config.routing.gate_url = "http://gate:5003".into();

    let ctl = Arc::new(ctl);
    let ledger = Arc::new(Ledger::new(
        config.activity.active_within(),
        config.activity.idle_after(),
    ));
    let state = AppState::with_parts(
        config,
        Arc::new(RwLock::new(catalog)),
        ctl.clone(),
        ledger.clone(),
    );
    Harness {
        app: modelgate_server::build_router(state),
        ctl,
        ledger,
    }
}

fn spec(name: &str, port: Option<u16>) -> ModelSpec {
    ModelSpec {
        name: name.into(),
        host: "localhost".into(),
        port,
        source: None,
    }
}

fn known() -> MemoryController {
    MemoryController::new(["qwen", "llama", "noport"])
}

/// Send a request via `oneshot` and return (status, parsed JSON body).
async fn send(app: &axum::Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();
    dispatch(app, req).await
}

async fn dispatch(
    app: &axum::Router,
    req: axum::http::Request<axum::body::Body>,
) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "GET", uri).await
}

async fn post(app: &axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    send(app, "POST", uri).await
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn gate_unknown_model_is_404() {
    let h = harness(known());
    let (status, body) = get(&h.app, "/m1/v1/models").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("m1"));
}

#[tokio::test(start_paused = true)]
async fn gate_running_model_is_204() {
    let h = harness(known());
    h.ctl.set_running("qwen", true);
    let (status, _) = send(&h.app, "POST", "/qwen/v1/chat/completions").await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(h.ledger.last_activity("qwen").is_some());
}

#[tokio::test(start_paused = true)]
async fn gate_cold_model_returns_retry_status() {
    let h = harness(known().with_start_delay(2));
    let (status, body) = get(&h.app, "/qwen/v1/models").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], "ready");
    assert_eq!(h.ctl.start_calls("qwen"), 1);
    assert!(h.ctl.is_running("qwen").await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn gate_replays_proxy_fallback_for_running_model() {
    let h = harness(known());
    h.ctl.set_running("qwen", true);
    let req = axum::http::Request::builder()
        .method("POST")
        .uri("/qwen/v1/chat/completions?stream=true")
        .header("x-modelgate-fallback", "1")
        .body(axum::body::Body::empty())
        .unwrap();
    let (status, body) = dispatch(&h.app, req).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["model"], "qwen");
    assert_eq!(h.ctl.start_calls("qwen"), 0);
}

#[tokio::test(start_paused = true)]
async fn gate_timeout_is_504() {
    let h = harness(known());
    h.ctl.set_never_ready("llama");
    let (status, _) = get(&h.app, "/llama/").await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn gate_supervisor_failure_is_500() {
    let h = harness(known());
    h.ctl.set_fail_start("qwen", true);
    let (status, _) = get(&h.app, "/qwen/").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test(start_paused = true)]
async fn unmatched_api_path_is_not_a_model() {
    let h = harness(known());
    let (status, _) = get(&h.app, "/api/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(&h.app, "/").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Inventory and control
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_model_count() {
    let h = harness(known());
    let (status, body) = get(&h.app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["models"], 3);
}

#[tokio::test]
async fn list_models_includes_endpoints_and_run_state() {
    let h = harness(known());
    h.ctl.set_running("llama", true);
    let (status, body) = get(&h.app, "/api/models").await;
    assert_eq!(status, StatusCode::OK);
    let models = body["models"].as_array().unwrap();
    assert_eq!(models.len(), 3);
    let llama = models.iter().find(|m| m["name"] == "llama").unwrap();
    assert_eq!(llama["endpoint"], "http://localhost:8102/");
    assert_eq!(llama["running"], true);

    let (_, body) = get(&h.app, "/api/models/running").await;
    assert_eq!(body["running"], serde_json::json!(["llama"]));
}

#[tokio::test]
async fn start_stop_restart_pass_through() {
    let h = harness(known());
    let (status, body) = post(&h.app, "/api/models/qwen/start").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    assert!(h.ctl.is_running("qwen").await.unwrap());
    assert!(h.ledger.last_activity("qwen").is_some());

    let (status, _) = post(&h.app, "/api/models/qwen/restart").await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&h.app, "/api/models/qwen/stop").await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = post(&h.app, "/api/models/qwen/stop").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!h.ctl.is_running("qwen").await.unwrap());
}

#[tokio::test]
async fn control_of_unknown_model_is_404() {
    let h = harness(known());
    let (status, _) = post(&h.app, "/api/models/ghost/start").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn model_status_reflects_ledger_and_supervisor() {
    let h = harness(known());
    h.ctl.set_running("qwen", true);
    post(&h.app, "/api/models/qwen/report").await;
    let (status, body) = get(&h.app, "/api/models/qwen/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);
    assert_eq!(body["active"], true);
    assert_eq!(body["idle"], false);
    assert_eq!(body["starting"], false);
}

// ---------------------------------------------------------------------------
// Activity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn report_then_activity_views() {
    let h = harness(known());
    let (status, body) = post(&h.app, "/api/models/qwen/report").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["last_activity"].is_string());

    h.ledger
        .report_at("llama", h.ledger.now() - chrono::Duration::minutes(45))
        .unwrap();
    h.ctl.set_running("llama", true);

    let (_, body) = get(&h.app, "/api/models/active").await;
    let active = body["active"].as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["name"], "qwen");

    let (_, body) = get(&h.app, "/api/models/idle").await;
    let idle = body["idle"].as_array().unwrap();
    assert_eq!(idle.len(), 1);
    assert_eq!(idle[0]["name"], "llama");

    let (_, body) = get(&h.app, "/api/models/activity").await;
    let names: Vec<_> = body["models"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["llama", "qwen"]);
}

#[tokio::test]
async fn report_with_invalid_name_is_400() {
    let h = harness(known());
    let (status, _) = post(&h.app, "/api/models/bad%20name/report").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

#[tokio::test]
async fn routes_skip_models_without_port() {
    let h = harness(known());
    let (status, body) = get(&h.app, "/api/routes").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["routes"],
        serde_json::json!({
            "llama": "http://localhost:8102/",
            "qwen": "http://localhost:8101/",
        })
    );
    assert!(body["nginx"]
        .as_str()
        .unwrap()
        .contains("proxy_pass http://gate:5003;"));
    assert_eq!(body["rules"].as_array().unwrap().len(), 2);
}
