use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use modelgate_core::access_log::model_segment;
use modelgate_core::catalog::RESERVED_NAMES;
use modelgate_core::routing::FALLBACK_HEADER;

use crate::error::AppError;
use crate::gate::GateDecision;
use crate::state::AppState;

/// Any method on `/{model}` or `/{model}/...`.
///
/// The proxy lands here when a model's upstream is down. 204 means the model
/// is already serving; the retry status means it just came up and the
/// original request should be replayed against it. A request marked with
/// the fallback header already failed against the model, so a serving model
/// is answered with the retry status too.
pub async fn gate(
    State(app): State<AppState>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, AppError> {
    let Some(name) = model_segment(uri.path()) else {
        return Err(AppError::not_found("no model name in path"));
    };
    if RESERVED_NAMES.contains(&name) {
        return Err(AppError::not_found(format!("no route for {}", uri.path())));
    }

    let replay = headers.contains_key(FALLBACK_HEADER);
    match app.gate.handle(name).await? {
        GateDecision::PassThrough if !replay => Ok(StatusCode::NO_CONTENT.into_response()),
        GateDecision::PassThrough | GateDecision::Retry => {
            let body = serde_json::json!({ "model": name, "status": "ready" });
            Ok((app.retry_status(), [(header::RETRY_AFTER, "0")], Json(body)).into_response())
        }
    }
}
