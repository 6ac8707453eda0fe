//! Process Controller: the narrow start/stop/status capability the
//! orchestrator needs from whatever actually supervises model processes.
//!
//! Run state is never cached here. Models crash, operators stop them by hand,
//! and other hosts start them; every caller re-queries.

mod memory;
mod remote;
mod systemctl;

pub use memory::MemoryController;
pub use remote::RemoteController;
pub use systemctl::SystemctlController;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use modelgate_core::catalog::ModelCatalog;
use modelgate_core::config::SupervisorConfig;
use modelgate_core::Result;

/// Catalog shared between the controller, the routing publisher and the
/// reload endpoint.
pub type SharedCatalog = Arc<RwLock<ModelCatalog>>;

#[async_trait]
pub trait ProcessController: Send + Sync {
    /// Configured model names, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    /// Configured models whose process is currently active.
    async fn list_running(&self) -> Result<Vec<String>>;

    /// Issue a start. Returns once the command is accepted, not once the
    /// model is serving.
    async fn start(&self, name: &str) -> Result<()>;

    /// Stop a model; stopping a stopped model succeeds.
    async fn stop(&self, name: &str) -> Result<()>;

    async fn restart(&self, name: &str) -> Result<()>;

    async fn is_running(&self, name: &str) -> Result<bool>;
}

/// Build the controller selected in configuration.
pub fn from_config(
    config: &SupervisorConfig,
    catalog: SharedCatalog,
) -> Result<Arc<dyn ProcessController>> {
    let controller: Arc<dyn ProcessController> = match config {
        SupervisorConfig::Systemctl {
            unit_template,
            sudo,
        } => Arc::new(SystemctlController::new(
            catalog,
            unit_template.clone(),
            *sudo,
        )?),
        SupervisorConfig::Remote { url } => Arc::new(RemoteController::new(url)?),
        SupervisorConfig::Memory => {
            let names = read_catalog(&catalog).names();
            Arc::new(MemoryController::new(names))
        }
    };
    Ok(controller)
}

pub(crate) fn read_catalog(catalog: &SharedCatalog) -> std::sync::RwLockReadGuard<'_, ModelCatalog> {
    catalog.read().unwrap_or_else(|e| e.into_inner())
}
