use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use modelgate_core::ModelgateError;

/// Private sentinel for explicit 404s that do not originate in the core
/// taxonomy (reserved or missing path segments).
#[derive(Debug)]
struct NotFoundError(String);

impl std::fmt::Display for NotFoundError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for NotFoundError {}

// ---------------------------------------------------------------------------
// AppError: unified error type for HTTP responses
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl AppError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self(NotFoundError(msg.into()).into())
    }

    pub fn status(&self) -> StatusCode {
        if self.0.downcast_ref::<NotFoundError>().is_some() {
            return StatusCode::NOT_FOUND;
        }
        match self.0.downcast_ref::<ModelgateError>() {
            Some(e) => match e {
                ModelgateError::UnknownModel(_) => StatusCode::NOT_FOUND,
                ModelgateError::InvalidModelName(_) => StatusCode::BAD_REQUEST,
                // Never retried by the proxy, unlike the ready signal.
                ModelgateError::StartTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
                ModelgateError::Publish { .. } => StatusCode::BAD_GATEWAY,
                ModelgateError::Supervisor { .. }
                | ModelgateError::Config(_)
                | ModelgateError::LedgerDb(_)
                | ModelgateError::HomeNotFound
                | ModelgateError::Io(_)
                | ModelgateError::Yaml(_)
                | ModelgateError::Json(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            None => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %self.0, "request failed");
        }
        let body = serde_json::json!({ "error": self.0.to_string() });
        (status, axum::Json(body)).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}
