use axum::extract::State;
use axum::Json;

use crate::controller::read_catalog;
use crate::state::AppState;

/// GET /api/health
pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    let models = read_catalog(&app.catalog).len();
    Json(serde_json::json!({
        "status": "ok",
        "service": "modelgate",
        "version": env!("CARGO_PKG_VERSION"),
        "models": models,
        "in_flight": app.gate.in_flight(),
    }))
}
