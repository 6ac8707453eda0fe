use std::path::PathBuf;

use async_trait::async_trait;
use modelgate_core::io::atomic_write;
use modelgate_core::routing::RouteTable;
use modelgate_core::{ModelgateError, Result};

use super::RouteSink;

/// Writes the nginx include and the activity-rules JSON to local files,
/// for a proxy that reads its config from disk.
pub struct FileSink {
    nginx_conf: Option<PathBuf>,
    rules: Option<PathBuf>,
    gate_url: String,
    retry_status: u16,
}

impl FileSink {
    pub fn new(
        nginx_conf: Option<PathBuf>,
        rules: Option<PathBuf>,
        gate_url: String,
        retry_status: u16,
    ) -> Self {
        Self {
            nginx_conf,
            rules,
            gate_url,
            retry_status,
        }
    }
}

fn publish_err(e: ModelgateError) -> ModelgateError {
    ModelgateError::Publish {
        sink: "file".to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl RouteSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn publish(&self, table: &RouteTable) -> Result<()> {
        if let Some(path) = &self.nginx_conf {
            let conf = table.render_nginx(&self.gate_url, self.retry_status);
            atomic_write(path, conf.as_bytes()).map_err(publish_err)?;
            tracing::debug!(path = %path.display(), "wrote nginx routes");
        }
        if let Some(path) = &self.rules {
            let rules = table.render_rules_json(&self.gate_url).map_err(publish_err)?;
            atomic_write(path, rules.as_bytes()).map_err(publish_err)?;
            tracing::debug!(path = %path.display(), "wrote activity rules");
        }
        Ok(())
    }
}
