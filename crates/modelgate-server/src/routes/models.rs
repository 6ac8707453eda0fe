use axum::extract::{Path, State};
use axum::Json;
use modelgate_core::catalog::validate_model_name;
use modelgate_core::ledger::ActivityRecord;
use serde::Serialize;

use crate::controller::read_catalog;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Serialize)]
struct ModelView {
    name: String,
    host: String,
    port: Option<u16>,
    endpoint: Option<String>,
    running: bool,
}

/// GET /api/models
pub async fn list_models(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let names = app.controller.list().await?;
    let running = app.controller.list_running().await?;
    let models: Vec<ModelView> = {
        let catalog = read_catalog(&app.catalog);
        names
            .into_iter()
            .map(|name| {
                let spec = catalog.get(&name);
                ModelView {
                    host: spec.map(|s| s.host.clone()).unwrap_or_default(),
                    port: spec.and_then(|s| s.port),
                    endpoint: spec.and_then(|s| s.endpoint()),
                    running: running.contains(&name),
                    name,
                }
            })
            .collect()
    };
    Ok(Json(serde_json::json!({ "models": models })))
}

/// GET /api/models/running
pub async fn list_running(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let running = app.controller.list_running().await?;
    Ok(Json(serde_json::json!({ "running": running })))
}

/// POST /api/models/{name}/start
///
/// Issues the start and returns without waiting for readiness. Activity is
/// stamped so the reaper gives the model a full idle window to load.
pub async fn start_model(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.controller.start(&name).await?;
    app.ledger.report(&name)?;
    Ok(Json(serde_json::json!({ "model": name, "status": "started" })))
}

/// POST /api/models/{name}/stop
pub async fn stop_model(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.controller.stop(&name).await?;
    Ok(Json(serde_json::json!({ "model": name, "status": "stopped" })))
}

/// POST /api/models/{name}/restart
pub async fn restart_model(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    app.controller.restart(&name).await?;
    app.ledger.report(&name)?;
    Ok(Json(serde_json::json!({ "model": name, "status": "restarted" })))
}

/// POST /api/models/{name}/report
pub async fn report_activity(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let last = app.ledger.report(&name)?;
    Ok(Json(serde_json::json!({ "model": name, "last_activity": last })))
}

/// GET /api/models/{name}/status
pub async fn model_status(
    State(app): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    validate_model_name(&name)?;
    let running = app.controller.is_running(&name).await?;
    let ledger = &app.ledger;
    Ok(Json(serde_json::json!({
        "model": name,
        "running": running,
        "starting": app.gate.in_flight().contains(&name),
        "last_activity": ledger.last_activity(&name),
        "active": ledger.is_active(&name, ledger.active_within()),
        "idle": ledger.is_idle(&name, ledger.idle_after()),
    })))
}

/// GET /api/models/active
pub async fn active_models(State(app): State<AppState>) -> Json<serde_json::Value> {
    let active: Vec<ActivityRecord> = app
        .ledger
        .snapshot_all()
        .into_iter()
        .filter(|r| r.active)
        .collect();
    Json(serde_json::json!({
        "active": active,
        "window_minutes": app.ledger.active_within().num_minutes(),
    }))
}

/// GET /api/models/idle: running models past the idle threshold, i.e. what
/// the next reaper tick would stop.
pub async fn idle_models(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let running = app.controller.list_running().await?;
    let idle = app.ledger.idle_names(&running);
    let records: Vec<ActivityRecord> = app
        .ledger
        .snapshot_all()
        .into_iter()
        .filter(|r| idle.contains(&r.name))
        .collect();
    Ok(Json(serde_json::json!({
        "idle": records,
        "threshold_minutes": app.ledger.idle_after().num_minutes(),
    })))
}

/// GET /api/models/activity
pub async fn activity(State(app): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "models": app.ledger.snapshot_all(),
        "timestamp": app.ledger.now(),
    }))
}

/// POST /api/models/reload
pub async fn reload_models(
    State(app): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let state = app.clone();
    let count = tokio::task::spawn_blocking(move || state.reload_catalog())
        .await
        .map_err(|e| AppError(anyhow::anyhow!("task join error: {e}")))??;
    Ok(Json(serde_json::json!({ "models": count })))
}
