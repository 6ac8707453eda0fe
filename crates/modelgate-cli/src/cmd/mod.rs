pub mod config;
pub mod models;
pub mod routes;
pub mod serve;

use anyhow::Context;
use modelgate_core::config::{Config, DEFAULT_CONFIG_FILE};
use std::path::{Path, PathBuf};

/// The file `config` commands read and write: the explicit path, or
/// `modelgate.yaml` in the working directory.
pub fn config_file(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// An explicit path must exist. Without one, `modelgate.yaml` is used when
/// present and built-in defaults otherwise.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let file = config_file(path);
    let source = (path.is_some() || file.exists()).then_some(file.as_path());
    if source.is_none() {
        tracing::debug!("no config file, using defaults");
    }
    Config::load_or_default(source).with_context(|| format!("failed to load {}", file.display()))
}
