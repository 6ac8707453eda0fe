use std::time::Duration;

use async_trait::async_trait;
use modelgate_core::config::WebUiTarget;
use modelgate_core::routing::RouteTable;
use modelgate_core::{ModelgateError, Result};
use reqwest::Client;

use super::RouteSink;

/// Registers every routed model as an OpenAI-compatible connection in an
/// Open WebUI instance.
pub struct WebUiSink {
    client: Client,
    url: String,
    router_host: String,
}

impl WebUiSink {
    pub fn new(target: &WebUiTarget) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ModelgateError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: target.url.trim_end_matches('/').to_owned(),
            router_host: target.router_host.clone(),
        })
    }

    fn payload(&self, table: &RouteTable) -> serde_json::Value {
        let names = table.names();
        let base_urls: Vec<String> = names
            .iter()
            .map(|name| format!("http://{}/{name}/v1", self.router_host))
            .collect();
        let keys = vec!["*"; names.len()];
        let configs: serde_json::Map<String, serde_json::Value> = (0..names.len())
            .map(|i| {
                (
                    i.to_string(),
                    serde_json::json!({
                        "enable": true,
                        "tags": [],
                        "prefix_id": "",
                        "model_ids": [],
                    }),
                )
            })
            .collect();
        serde_json::json!({
            "ENABLE_OPENAI_API": true,
            "OPENAI_API_BASE_URLS": base_urls,
            "OPENAI_API_KEYS": keys,
            "OPENAI_API_CONFIGS": configs,
        })
    }

    fn err(message: String) -> ModelgateError {
        ModelgateError::Publish {
            sink: "webui".to_string(),
            message,
        }
    }
}

#[async_trait]
impl RouteSink for WebUiSink {
    fn name(&self) -> &str {
        "webui"
    }

    async fn publish(&self, table: &RouteTable) -> Result<()> {
        let url = format!("{}/api/v1/openai/config", self.url);
        let response = self
            .client
            .post(&url)
            .json(&self.payload(table))
            .send()
            .await
            .map_err(|e| Self::err(format!("POST {url}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::err(format!("POST {url} returned {status}: {}", body.trim())));
        }
        tracing::info!(models = table.len(), "open webui connections updated");
        Ok(())
    }
}
