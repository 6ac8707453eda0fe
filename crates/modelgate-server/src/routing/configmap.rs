use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use modelgate_core::config::ConfigMapTarget;
use modelgate_core::routing::RouteTable;
use modelgate_core::{ModelgateError, Result};

use super::RouteSink;

/// Key holding the nginx `location` blocks.
pub const NGINX_KEY: &str = "nginx.conf";
/// Key holding the activity-monitor rules.
pub const RULES_KEY: &str = "config.json";

/// Merge-patches the proxy's ConfigMap in Kubernetes.
pub struct ConfigMapSink {
    api: Api<ConfigMap>,
    name: String,
    gate_url: String,
    retry_status: u16,
}

impl ConfigMapSink {
    /// Connect using the in-cluster config or the local kubeconfig.
    pub async fn connect(
        target: &ConfigMapTarget,
        gate_url: &str,
        retry_status: u16,
    ) -> Result<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| ModelgateError::Config(format!("cannot create kube client: {e}")))?;
        Ok(Self {
            api: Api::namespaced(client, &target.namespace),
            name: target.name.clone(),
            gate_url: gate_url.to_string(),
            retry_status,
        })
    }
}

fn patch_body(table: &RouteTable, gate_url: &str, retry_status: u16) -> Result<serde_json::Value> {
    Ok(serde_json::json!({
        "data": {
            NGINX_KEY: table.render_nginx(gate_url, retry_status),
            RULES_KEY: table.render_rules_json(gate_url)?,
        }
    }))
}

#[async_trait]
impl RouteSink for ConfigMapSink {
    fn name(&self) -> &str {
        "configmap"
    }

    async fn publish(&self, table: &RouteTable) -> Result<()> {
        let patch = patch_body(table, &self.gate_url, self.retry_status)?;
        self.api
            .patch(&self.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ModelgateError::Publish {
                sink: "configmap".to_string(),
                message: format!("patch {}: {e}", self.name),
            })?;
        tracing::info!(configmap = %self.name, routes = table.len(), "configmap patched");
        Ok(())
    }
}
