use thiserror::Error;

#[derive(Debug, Error)]
pub enum ModelgateError {
    #[error("unknown model: {0}")]
    UnknownModel(String),

    #[error("invalid model name '{0}': must be non-empty without '/', '..' or whitespace")]
    InvalidModelName(String),

    #[error("supervisor failed for '{model}': {message}")]
    Supervisor { model: String, message: String },

    #[error("model '{model}' did not become ready within {waited_secs}s")]
    StartTimeout { model: String, waited_secs: u64 },

    #[error("publishing routes to {sink} failed: {message}")]
    Publish { sink: String, message: String },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("activity store error: {0}")]
    LedgerDb(String),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl ModelgateError {
    pub fn supervisor(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Supervisor {
            model: model.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelgateError>;
