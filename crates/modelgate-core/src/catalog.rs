//! The set of models this host knows how to run.
//!
//! Models come from two places: a directory of env-style unit config files
//! (one file per model, the file name is the model name, `PORT="8198"` gives
//! its listen port) and an inline list in `modelgate.yaml`. Inline entries win
//! when both define the same name.

use crate::config::{Config, InlineModel};
use crate::error::{ModelgateError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Path segments the HTTP surface claims for itself.
pub const RESERVED_NAMES: &[&str] = &["api"];

/// Reject names that would be unsafe as a systemd instance or a URL segment.
pub fn validate_model_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name.contains('/')
        || name.contains("..")
        || name.chars().any(char::is_whitespace);
    if bad {
        return Err(ModelgateError::InvalidModelName(name.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub host: String,
    pub port: Option<u16>,
    /// Config file the model was discovered from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl ModelSpec {
    pub fn endpoint(&self) -> Option<String> {
        self.port.map(|p| format!("http://{}:{}/", self.host, p))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelCatalog {
    models: BTreeMap<String, ModelSpec>,
}

impl ModelCatalog {
    pub fn new(models: impl IntoIterator<Item = ModelSpec>) -> Self {
        Self {
            models: models.into_iter().map(|m| (m.name.clone(), m)).collect(),
        }
    }

    /// Build the catalog described by `config`: directory scan first, then
    /// inline entries layered on top.
    pub fn load(config: &Config) -> Result<Self> {
        let mut catalog = match &config.models.dir {
            Some(dir) => Self::load_dir(dir, &config.models.default_host)?,
            None => Self::default(),
        };
        for inline in &config.models.inline {
            catalog.insert(inline_spec(inline, &config.models.default_host))?;
        }
        Ok(catalog)
    }

    /// Scan `dir` for model config files. A missing directory yields an empty
    /// catalog; unreadable files are kept with an unknown port.
    pub fn load_dir(dir: &Path, host: &str) -> Result<Self> {
        let dir = crate::io::expand_home(dir)?;
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "models directory does not exist");
            return Ok(Self::default());
        }

        let mut catalog = Self::default();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string)
            else {
                continue;
            };
            if name.starts_with('.') || validate_model_name(&name).is_err() {
                tracing::debug!(file = %path.display(), "skipping non-model file");
                continue;
            }
            let port = match std::fs::read_to_string(&path) {
                Ok(content) => parse_port(&content),
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "cannot read model config");
                    None
                }
            };
            catalog.models.insert(
                name.clone(),
                ModelSpec {
                    name,
                    host: host.to_string(),
                    port,
                    source: Some(path),
                },
            );
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, spec: ModelSpec) -> Result<()> {
        validate_model_name(&spec.name)?;
        self.models.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    /// Model names in ascending order.
    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn inline_spec(inline: &InlineModel, default_host: &str) -> ModelSpec {
    ModelSpec {
        name: inline.name.clone(),
        host: inline
            .host
            .clone()
            .unwrap_or_else(|| default_host.to_string()),
        port: inline.port,
        source: None,
    }
}

/// Extract the value of the first `PORT=` line, tolerating quotes.
pub fn parse_port(content: &str) -> Option<u16> {
    content
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("PORT="))
        .map(|v| v.trim().trim_matches('"').trim_matches('\''))
        .and_then(|v| v.parse().ok())
}
