//! Idle Reaper: periodically stops running models nobody has used lately.
//!
//! The stop targets come from the controller (what is actually running) and
//! idleness from the ledger (what has actually been used). A model that
//! crashed and was restarted externally is judged by its traffic, not by
//! what this process last did to it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modelgate_core::ledger::Ledger;
use serde::Serialize;
use tokio::sync::watch;

use crate::controller::ProcessController;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReapReport {
    pub stopped: Vec<String>,
    pub kept: Vec<String>,
    /// Running models seen for the first time; their idle clock starts now.
    pub seeded: Vec<String>,
    pub failed: Vec<String>,
    /// Labels returned by the tick hooks.
    pub notified: Vec<String>,
}

/// Runs after every reaper pass, with the ledger as it stands then.
#[async_trait]
pub trait IdleHook: Send + Sync {
    fn name(&self) -> &str;

    /// Returns a label for each notification sent.
    async fn after_tick(&self, ledger: &Ledger) -> Vec<String>;
}

pub struct IdleReaper {
    controller: Arc<dyn ProcessController>,
    ledger: Arc<Ledger>,
    idle_after: chrono::Duration,
    hooks: Vec<Box<dyn IdleHook>>,
}

impl IdleReaper {
    pub fn new(controller: Arc<dyn ProcessController>, ledger: Arc<Ledger>) -> Self {
        let idle_after = ledger.idle_after();
        Self {
            controller,
            ledger,
            idle_after,
            hooks: Vec::new(),
        }
    }

    pub fn with_hooks(mut self, hooks: Vec<Box<dyn IdleHook>>) -> Self {
        self.hooks = hooks;
        self
    }

    /// One pass over the running models, then the hooks. Never fails: a
    /// listing error skips the stops and a stop error is retried on the next
    /// tick.
    pub async fn tick(&self) -> ReapReport {
        let mut report = self.reap().await;
        for hook in &self.hooks {
            let notified = hook.after_tick(&self.ledger).await;
            tracing::debug!(hook = hook.name(), count = notified.len(), "idle hook ran");
            report.notified.extend(notified);
        }
        report
    }

    async fn reap(&self) -> ReapReport {
        let mut report = ReapReport::default();
        let running = match self.controller.list_running().await {
            Ok(running) => running,
            Err(e) => {
                tracing::error!(error = %e, "reaper could not list running models");
                return report;
            }
        };

        for name in running {
            match self.ledger.seed(&name) {
                Ok(true) => {
                    tracing::info!(
                        model = %name,
                        "running model has no activity record, tracking from now"
                    );
                    report.seeded.push(name);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(model = %name, error = %e, "skipping model with invalid name");
                    continue;
                }
            }

            if !self.ledger.is_idle(&name, self.idle_after) {
                report.kept.push(name);
                continue;
            }

            let last = self.ledger.last_activity(&name);
            match self.controller.stop(&name).await {
                Ok(()) => {
                    tracing::info!(model = %name, last_activity = ?last, "stopped idle model");
                    report.stopped.push(name);
                }
                Err(e) => {
                    tracing::error!(model = %name, error = %e, "failed to stop idle model");
                    report.failed.push(name);
                }
            }
        }
        report
    }

    /// Tick every `interval` until `shutdown` flips to true.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            idle_after_minutes = self.idle_after.num_minutes(),
            "idle reaper started"
        );
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if !report.stopped.is_empty() || !report.failed.is_empty() {
                        tracing::info!(
                            stopped = ?report.stopped,
                            failed = ?report.failed,
                            notified = report.notified.len(),
                            "reaper tick"
                        );
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("idle reaper stopped");
    }
}

/// Periodically log which models are active and which are idle.
pub async fn run_activity_summary(
    ledger: Arc<Ledger>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => log_activity_summary(&ledger),
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

fn log_activity_summary(ledger: &Ledger) {
    let snapshot = ledger.snapshot_all();
    let active: Vec<&str> = snapshot
        .iter()
        .filter(|r| r.active)
        .map(|r| r.name.as_str())
        .collect();
    let idle: Vec<&str> = snapshot
        .iter()
        .filter(|r| r.idle)
        .map(|r| r.name.as_str())
        .collect();
    tracing::info!(
        tracked = snapshot.len(),
        active = ?active,
        idle = ?idle,
        "activity summary"
    );
}
