use axum::extract::State;
use axum::Json;

use crate::error::AppError;
use crate::routing::desired_table;
use crate::state::AppState;

/// GET /api/routes: the routing table the publisher would push right now,
/// with both rendered forms.
pub async fn get_routes(State(app): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let table = desired_table(app.controller.as_ref(), &app.catalog).await?;
    let gate_url = &app.config.routing.gate_url;
    Ok(Json(serde_json::json!({
        "routes": table.iter().collect::<std::collections::BTreeMap<_, _>>(),
        "nginx": table.render_nginx(gate_url, app.config.gate.retry_status),
        "rules": table.activity_rules(gate_url),
    })))
}
