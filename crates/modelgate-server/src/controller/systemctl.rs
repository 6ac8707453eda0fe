use std::path::PathBuf;
use std::process::Output;

use async_trait::async_trait;
use modelgate_core::catalog::validate_model_name;
use modelgate_core::{ModelgateError, Result};
use tokio::process::Command;

use super::{read_catalog, ProcessController, SharedCatalog};

/// Drives one systemd template unit per model (`model@qwen.service`).
pub struct SystemctlController {
    catalog: SharedCatalog,
    unit_template: String,
    sudo: bool,
    program: PathBuf,
}

impl SystemctlController {
    pub fn new(catalog: SharedCatalog, unit_template: String, sudo: bool) -> Result<Self> {
        let program = which::which("systemctl").map_err(|_| {
            ModelgateError::Config("systemctl not found on PATH".to_string())
        })?;
        Ok(Self::with_program(catalog, unit_template, sudo, program))
    }

    /// Use an explicit `systemctl` binary.
    pub fn with_program(
        catalog: SharedCatalog,
        unit_template: String,
        sudo: bool,
        program: PathBuf,
    ) -> Self {
        Self {
            catalog,
            unit_template,
            sudo,
            program,
        }
    }

    pub fn unit_name(&self, name: &str) -> String {
        self.unit_template.replace("{name}", name)
    }

    fn ensure_known(&self, name: &str) -> Result<()> {
        validate_model_name(name)?;
        if !read_catalog(&self.catalog).contains(name) {
            return Err(ModelgateError::UnknownModel(name.to_string()));
        }
        Ok(())
    }

    async fn exec(&self, action: &str, name: &str, privileged: bool) -> Result<Output> {
        let unit = self.unit_name(name);
        let mut cmd = if privileged && self.sudo {
            let mut c = Command::new("sudo");
            c.arg("-n").arg(&self.program);
            c
        } else {
            Command::new(&self.program)
        };
        cmd.arg(action).arg(&unit).kill_on_drop(true);
        tracing::debug!(model = name, unit = %unit, action, "running systemctl");
        cmd.output()
            .await
            .map_err(|e| ModelgateError::supervisor(name, format!("failed to run systemctl: {e}")))
    }

    async fn control(&self, action: &str, name: &str) -> Result<()> {
        self.ensure_known(name)?;
        let output = self.exec(action, name, true).await?;
        if output.status.success() {
            tracing::info!(model = name, action, "systemctl succeeded");
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(ModelgateError::supervisor(
            name,
            format!("systemctl {action} exited with {}: {stderr}", output.status),
        ))
    }
}

#[async_trait]
impl ProcessController for SystemctlController {
    async fn list(&self) -> Result<Vec<String>> {
        Ok(read_catalog(&self.catalog).names())
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        let names = self.list().await?;
        let checks = names.iter().map(|n| self.is_running(n));
        let results = futures::future::join_all(checks).await;
        let mut running = Vec::new();
        for (name, result) in names.into_iter().zip(results) {
            if result? {
                running.push(name);
            }
        }
        Ok(running)
    }

    async fn start(&self, name: &str) -> Result<()> {
        self.control("start", name).await
    }

    async fn stop(&self, name: &str) -> Result<()> {
        self.control("stop", name).await
    }

    async fn restart(&self, name: &str) -> Result<()> {
        self.control("restart", name).await
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        validate_model_name(name)?;
        // `is-active` exits non-zero for inactive, failed and unknown units alike.
        let output = self.exec("is-active", name, false).await?;
        let state = String::from_utf8_lossy(&output.stdout);
        Ok(output.status.success() && state.trim() == "active")
    }
}
