use std::sync::{Arc, RwLock};

use axum::http::StatusCode;
use modelgate_core::activity_db::ActivityDb;
use modelgate_core::catalog::ModelCatalog;
use modelgate_core::config::Config;
use modelgate_core::io::expand_home;
use modelgate_core::ledger::Ledger;
use modelgate_core::{ModelgateError, Result};

use crate::controller::{self, ProcessController, SharedCatalog};
use crate::gate::ColdStartGate;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub catalog: SharedCatalog,
    pub controller: Arc<dyn ProcessController>,
    pub ledger: Arc<Ledger>,
    pub gate: ColdStartGate,
}

impl AppState {
    /// Wire up catalog, supervisor, ledger and gate from configuration.
    pub fn from_config(config: Config) -> Result<Self> {
        let catalog = Arc::new(RwLock::new(ModelCatalog::load(&config)?));
        let controller = controller::from_config(&config.supervisor, catalog.clone())?;

        let mut ledger = Ledger::new(
            config.activity.active_within(),
            config.activity.idle_after(),
        );
        if let Some(path) = &config.activity.db_path {
            let path = expand_home(path)?;
            ledger = ledger.with_store(ActivityDb::open(&path)?)?;
            tracing::info!(path = %path.display(), "activity persisted");
        }

        Ok(Self::with_parts(config, catalog, controller, Arc::new(ledger)))
    }

    pub fn with_parts(
        config: Config,
        catalog: SharedCatalog,
        controller: Arc<dyn ProcessController>,
        ledger: Arc<Ledger>,
    ) -> Self {
        let gate = ColdStartGate::new(controller.clone(), ledger.clone(), &config.gate);
        Self {
            config: Arc::new(config),
            catalog,
            controller,
            ledger,
            gate,
        }
    }

    /// Re-read the model directory and inline entries. Returns the new
    /// model count.
    pub fn reload_catalog(&self) -> Result<usize> {
        let fresh = ModelCatalog::load(&self.config)?;
        let count = fresh.len();
        *self
            .catalog
            .write()
            .map_err(|_| ModelgateError::Config("model catalog lock poisoned".into()))? = fresh;
        tracing::info!(models = count, "model catalog reloaded");
        Ok(count)
    }

    /// Status telling the proxy to retry against a model that just came up.
    pub fn retry_status(&self) -> StatusCode {
        StatusCode::from_u16(self.config.gate.retry_status)
            .unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
    }
}
