//! Routing Publisher: keeps the proxy's view of the model inventory current.
//!
//! Each cycle builds the desired [`RouteTable`] from the controller's model
//! list, compares it with the last table every sink accepted, and only
//! publishes on a difference. Publishing failures are retried a fixed number
//! of times, then left for the next cycle. Nothing here is fatal.

mod configmap;
mod file;
mod webui;

pub use configmap::ConfigMapSink;
pub use file::FileSink;
pub use webui::WebUiSink;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use modelgate_core::config::RoutingConfig;
use modelgate_core::routing::RouteTable;
use modelgate_core::Result;
use tokio::sync::watch;

use crate::controller::{read_catalog, ProcessController, SharedCatalog};

#[async_trait]
pub trait RouteSink: Send + Sync {
    fn name(&self) -> &str;

    async fn publish(&self, table: &RouteTable) -> Result<()>;
}

/// The table the proxy should currently have: every configured model that
/// has a known endpoint.
pub async fn desired_table(
    controller: &dyn ProcessController,
    catalog: &SharedCatalog,
) -> Result<RouteTable> {
    let names = controller.list().await?;
    Ok(RouteTable::build(&names, &read_catalog(catalog)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Desired table matches what was last published.
    Unchanged,
    /// No routable models; an empty table is never pushed.
    Empty,
    Published { routes: usize },
    /// Sinks that still failed after all retries.
    Failed { sinks: Vec<String> },
    /// The model list could not be read.
    Skipped,
}

pub struct RoutingPublisher {
    controller: Arc<dyn ProcessController>,
    catalog: SharedCatalog,
    sinks: Vec<Box<dyn RouteSink>>,
    max_retries: u32,
    retry_delay: Duration,
    last_published: Mutex<Option<RouteTable>>,
}

impl RoutingPublisher {
    pub fn new(
        controller: Arc<dyn ProcessController>,
        catalog: SharedCatalog,
        sinks: Vec<Box<dyn RouteSink>>,
    ) -> Self {
        Self {
            controller,
            catalog,
            sinks,
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
            last_published: Mutex::new(None),
        }
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    /// Build a publisher with every sink named in `config`. `retry_status`
    /// is the gate status the rendered proxy config replays on.
    pub async fn from_config(
        config: &RoutingConfig,
        retry_status: u16,
        controller: Arc<dyn ProcessController>,
        catalog: SharedCatalog,
    ) -> Result<Self> {
        let mut sinks: Vec<Box<dyn RouteSink>> = Vec::new();
        if config.nginx_conf_path.is_some() || config.rules_path.is_some() {
            sinks.push(Box::new(FileSink::new(
                config.nginx_conf_path.clone(),
                config.rules_path.clone(),
                config.gate_url.clone(),
                retry_status,
            )));
        }
        if let Some(target) = &config.configmap {
            sinks.push(Box::new(ConfigMapSink::connect(target, &config.gate_url, retry_status).await?));
        }
        if let Some(target) = &config.webui {
            sinks.push(Box::new(WebUiSink::new(target)?));
        }
        Ok(Self::new(controller, catalog, sinks)
            .with_retries(config.max_retries, Duration::from_secs(config.retry_delay_secs)))
    }

    pub async fn desired(&self) -> Result<RouteTable> {
        desired_table(self.controller.as_ref(), &self.catalog).await
    }

    pub fn last_published(&self) -> Option<RouteTable> {
        self.lock().clone()
    }

    pub async fn cycle(&self) -> CycleOutcome {
        let desired = match self.desired().await {
            Ok(table) => table,
            Err(e) => {
                tracing::error!(error = %e, "cannot build route table");
                return CycleOutcome::Skipped;
            }
        };
        if desired.is_empty() {
            tracing::debug!("no routable models, nothing to publish");
            return CycleOutcome::Empty;
        }
        if self.lock().as_ref() == Some(&desired) {
            return CycleOutcome::Unchanged;
        }

        tracing::info!(routes = desired.len(), models = ?desired.names(), "publishing routes");
        let mut failed = Vec::new();
        for sink in &self.sinks {
            if let Err(e) = self.publish_with_retry(sink.as_ref(), &desired).await {
                tracing::error!(sink = sink.name(), error = %e, "giving up until next cycle");
                failed.push(sink.name().to_string());
            }
        }
        if !failed.is_empty() {
            return CycleOutcome::Failed { sinks: failed };
        }

        let routes = desired.len();
        *self.lock() = Some(desired);
        CycleOutcome::Published { routes }
    }

    async fn publish_with_retry(&self, sink: &dyn RouteSink, table: &RouteTable) -> Result<()> {
        let mut attempt = 1;
        loop {
            match sink.publish(table).await {
                Ok(()) => {
                    tracing::info!(sink = sink.name(), attempt, "routes published");
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    tracing::warn!(
                        sink = sink.name(),
                        attempt,
                        max = self.max_retries,
                        error = %e,
                        "publish failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            sinks = self.sinks.len(),
            "routing publisher started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("routing publisher stopped");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<RouteTable>> {
        self.last_published.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::MemoryController;
    use modelgate_core::catalog::{ModelCatalog, ModelSpec};
    use modelgate_core::ModelgateError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::RwLock;

    /// Records every table it receives; fails the first `fail_first` calls.
    struct RecordingSink {
        calls: Arc<AtomicU32>,
        fail_first: u32,
        tables: Arc<Mutex<Vec<RouteTable>>>,
    }

    #[async_trait]
    impl RouteSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn publish(&self, table: &RouteTable) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ModelgateError::Publish {
                    sink: "recording".into(),
                    message: "unavailable".into(),
                });
            }
            self.tables.lock().unwrap().push(table.clone());
            Ok(())
        }
    }

    fn spec(name: &str, port: Option<u16>) -> ModelSpec {
        ModelSpec {
            name: name.into(),
            host: "localhost".into(),
            port,
            source: None,
        }
    }

    type Fixture = (
        RoutingPublisher,
        Arc<AtomicU32>,
        Arc<Mutex<Vec<RouteTable>>>,
        SharedCatalog,
    );

    fn publisher(specs: Vec<ModelSpec>, fail_first: u32) -> Fixture {
        let names: Vec<String> = specs.iter().map(|s| s.name.clone()).collect();
        let catalog = Arc::new(RwLock::new(ModelCatalog::new(specs)));
        let ctl = Arc::new(MemoryController::new(names));
        let calls = Arc::new(AtomicU32::new(0));
        let tables = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink {
            calls: calls.clone(),
            fail_first,
            tables: tables.clone(),
        };
        let sinks = vec![Box::new(sink) as Box<dyn RouteSink>];
        let publisher = RoutingPublisher::new(ctl, catalog.clone(), sinks)
            .with_retries(3, Duration::from_secs(5));
        (publisher, calls, tables, catalog)
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_once_then_suppresses_unchanged() {
        let (publisher, calls, tables, _catalog) =
            publisher(vec![spec("qwen", Some(8101)), spec("llama", Some(8102))], 0);

        assert_eq!(publisher.cycle().await, CycleOutcome::Published { routes: 2 });
        assert_eq!(publisher.cycle().await, CycleOutcome::Unchanged);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(tables.lock().unwrap()[0].names(), vec!["llama", "qwen"]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_table_is_never_published() {
        let (publisher, calls, _tables, _catalog) = publisher(vec![spec("noport", None)], 0);
        assert_eq!(publisher.cycle().await, CycleOutcome::Empty);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(publisher.last_published().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failure_is_retried_within_cycle() {
        let (publisher, calls, _tables, _catalog) = publisher(vec![spec("qwen", Some(8101))], 2);
        let began = tokio::time::Instant::now();
        assert_eq!(publisher.cycle().await, CycleOutcome::Published { routes: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let waited = began.elapsed();
        assert!(waited >= Duration::from_secs(10) && waited < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_leave_table_for_next_cycle() {
        let (publisher, calls, _tables, _catalog) = publisher(vec![spec("qwen", Some(8101))], 3);
        assert_eq!(
            publisher.cycle().await,
            CycleOutcome::Failed {
                sinks: vec!["recording".into()]
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(publisher.last_published().is_none());

        assert_eq!(publisher.cycle().await, CycleOutcome::Published { routes: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn catalog_change_triggers_republish() {
        let (publisher, calls, tables, catalog) = publisher(vec![spec("qwen", Some(8101))], 0);
        publisher.cycle().await;

        catalog
            .write()
            .unwrap()
            .insert(spec("qwen", Some(9001)))
            .unwrap();
        assert_eq!(publisher.cycle().await, CycleOutcome::Published { routes: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let last = tables.lock().unwrap().last().cloned().unwrap();
        assert_eq!(
            last.iter().next().map(|(_, e)| e.as_str()),
            Some("http://localhost:9001/")
        );
    }
}
