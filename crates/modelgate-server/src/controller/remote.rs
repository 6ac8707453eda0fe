use std::time::Duration;

use async_trait::async_trait;
use modelgate_core::catalog::validate_model_name;
use modelgate_core::{ModelgateError, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use super::ProcessController;

/// Supervisor reached over HTTP: another modelgate, or any inference service
/// exposing the same `/api/models` surface.
#[derive(Debug, Clone)]
pub struct RemoteController {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ModelsResponse {
    models: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    name: String,
}

#[derive(Deserialize)]
struct RunningResponse {
    running: Vec<String>,
}

impl RemoteController {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_timeout(url, Duration::from_secs(30))
    }

    pub fn with_timeout(url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ModelgateError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_owned(),
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ModelgateError::supervisor("*", format!("GET {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(ModelgateError::supervisor(
                "*",
                format!("GET {url} returned {}", response.status()),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| ModelgateError::supervisor("*", format!("GET {url}: {e}")))
    }

    async fn action(&self, name: &str, action: &str) -> Result<()> {
        validate_model_name(name)?;
        let url = format!("{}/api/models/{name}/{action}", self.base_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| ModelgateError::supervisor(name, format!("POST {url}: {e}")))?;
        match response.status() {
            s if s.is_success() => {
                tracing::info!(model = name, action, "remote supervisor accepted");
                Ok(())
            }
            StatusCode::NOT_FOUND => Err(ModelgateError::UnknownModel(name.to_string())),
            s => {
                let body = response.text().await.unwrap_or_default();
                Err(ModelgateError::supervisor(
                    name,
                    format!("{action} returned {s}: {}", body.trim()),
                ))
            }
        }
    }
}

#[async_trait]
impl ProcessController for RemoteController {
    async fn list(&self) -> Result<Vec<String>> {
        let body: ModelsResponse = self.get_json("/api/models").await?;
        let mut names: Vec<String> = body.models.into_iter().map(|m| m.name).collect();
        names.sort();
        Ok(names)
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        let body: RunningResponse = self.get_json("/api/models/running").await?;
        let mut names = body.running;
        names.sort();
        Ok(names)
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.action(name, "start").await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.action(name, "stop").await
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.action(name, "restart").await
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        validate_model_name(name)?;
        Ok(self.list_running().await?.iter().any(|n| n == name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_and_running_parse_responses() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/models")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"models":[{"name":"qwen","port":8101},{"name":"llama","port":null}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/api/models/running")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"running":["qwen"]}"#)
            .expect(2)
            .create_async()
            .await;

        let ctl = RemoteController::new(&server.url()).unwrap();
        assert_eq!(ctl.list().await.unwrap(), vec!["llama", "qwen"]);
        assert_eq!(ctl.list_running().await.unwrap(), vec!["qwen"]);
        assert!(!ctl.is_running("llama").await.unwrap());
    }

    #[tokio::test]
    async fn start_posts_to_model_action() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/models/qwen/start")
            .with_status(200)
            .with_body(r#"{"status":"started"}"#)
            .create_async()
            .await;

        let ctl = RemoteController::new(&format!("{}/", server.url())).unwrap();
        ctl.start("qwen").await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn not_found_maps_to_unknown_model() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/models/ghost/stop")
            .with_status(404)
            .create_async()
            .await;

        let ctl = RemoteController::new(&server.url()).unwrap();
        assert!(matches!(
            ctl.stop("ghost").await,
            Err(ModelgateError::UnknownModel(_))
        ));
    }

    #[tokio::test]
    async fn server_error_maps_to_supervisor() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/models/qwen/restart")
            .with_status(500)
            .with_body("unit failed")
            .create_async()
            .await;

        let ctl = RemoteController::new(&server.url()).unwrap();
        match ctl.restart("qwen").await {
            Err(ModelgateError::Supervisor { model, message }) => {
                assert_eq!(model, "qwen");
                assert!(message.contains("unit failed"), "{message}");
            }
            other => panic!("expected Supervisor, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_host_is_supervisor_error() {
        let ctl = RemoteController::with_timeout("http://127.0.0.1:1", Duration::from_millis(200))
            .unwrap();
        assert!(matches!(
            ctl.list_running().await,
            Err(ModelgateError::Supervisor { .. })
        ));
    }
}
