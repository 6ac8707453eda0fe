//! Cold-Start Gate: the handler the proxy falls back to when a model's
//! upstream is unreachable.
//!
//! A request for a running model passes straight through. A request for a
//! stopped model joins (or creates) the single in-flight start attempt for
//! that model and waits for it to finish. Attempts run as detached tasks, so
//! a caller that disconnects never cancels an attempt other callers are
//! waiting on; each attempt is bounded by `ready_timeout` instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use modelgate_core::catalog::validate_model_name;
use modelgate_core::config::GateConfig;
use modelgate_core::ledger::Ledger;
use modelgate_core::{ModelgateError, Result};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::controller::ProcessController;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// The model is serving; the proxy should send the request to it.
    PassThrough,
    /// The model just became ready; the proxy should retry the request.
    Retry,
}

/// Result of one start attempt, shared by every caller that joined it.
pub type AttemptOutcome = std::result::Result<(), AttemptFailure>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    UnknownModel,
    Supervisor(String),
    Timeout { waited_secs: u64 },
}

impl AttemptFailure {
    fn into_error(self, name: &str) -> ModelgateError {
        match self {
            Self::UnknownModel => ModelgateError::UnknownModel(name.to_string()),
            Self::Supervisor(message) => ModelgateError::supervisor(name, message),
            Self::Timeout { waited_secs } => ModelgateError::StartTimeout {
                model: name.to_string(),
                waited_secs,
            },
        }
    }
}

type AttemptRx = watch::Receiver<Option<AttemptOutcome>>;

#[derive(Clone)]
pub struct ColdStartGate {
    inner: Arc<GateInner>,
}

struct GateInner {
    controller: Arc<dyn ProcessController>,
    ledger: Arc<Ledger>,
    poll_interval: Duration,
    ready_timeout: Duration,
    attempts: Mutex<HashMap<String, AttemptRx>>,
}

impl ColdStartGate {
    pub fn new(
        controller: Arc<dyn ProcessController>,
        ledger: Arc<Ledger>,
        config: &GateConfig,
    ) -> Self {
        Self::with_timing(
            controller,
            ledger,
            config.poll_interval(),
            config.ready_timeout(),
        )
    }

    pub fn with_timing(
        controller: Arc<dyn ProcessController>,
        ledger: Arc<Ledger>,
        poll_interval: Duration,
        ready_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(GateInner {
                controller,
                ledger,
                poll_interval,
                ready_timeout,
                attempts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Decide what the proxy should do with a request for `name`.
    pub async fn handle(&self, name: &str) -> Result<GateDecision> {
        validate_model_name(name)?;
        let inner = &self.inner;

        match inner.controller.is_running(name).await {
            Ok(true) => {
                inner.ledger.report(name)?;
                return Ok(GateDecision::PassThrough);
            }
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(model = name, error = %e, "status check failed, treating as stopped");
            }
        }

        if !inner.controller.list().await?.iter().any(|n| n == name) {
            return Err(ModelgateError::UnknownModel(name.to_string()));
        }

        let mut rx = self.join_or_spawn(name);
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => value.clone(),
            Err(_) => None,
        };
        match outcome {
            Some(Ok(())) => Ok(GateDecision::Retry),
            Some(Err(failure)) => Err(failure.into_error(name)),
            None => Err(ModelgateError::supervisor(name, "start attempt was aborted")),
        }
    }

    /// Models with a start attempt in progress, sorted.
    pub fn in_flight(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Subscribe to the running attempt for `name`, or register and spawn a
    /// new one. The registry lock is released before the task starts.
    fn join_or_spawn(&self, name: &str) -> AttemptRx {
        let mut attempts = self.inner.lock();
        if let Some(rx) = attempts.get(name) {
            tracing::debug!(model = name, "joining in-flight start");
            return rx.clone();
        }
        let (tx, rx) = watch::channel(None);
        attempts.insert(name.to_string(), rx.clone());
        drop(attempts);

        let inner = self.inner.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let outcome = {
                let _registered = Registered {
                    inner: inner.clone(),
                    name: name.clone(),
                };
                inner.run_attempt(&name).await
            };
            tx.send_replace(Some(outcome));
        });
        rx
    }
}

/// Removes the registry entry when the attempt ends, including by panic, so
/// the next cold start spawns a fresh attempt.
struct Registered {
    inner: Arc<GateInner>,
    name: String,
}

impl Drop for Registered {
    fn drop(&mut self) {
        self.inner.lock().remove(&self.name);
    }
}

impl GateInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AttemptRx>> {
        self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn run_attempt(&self, name: &str) -> AttemptOutcome {
        let began = Instant::now();

        // Another host or an operator may have started it since the check.
        if matches!(self.controller.is_running(name).await, Ok(true)) {
            self.report(name);
            return Ok(());
        }

        tracing::info!(model = name, "cold start");
        // Stamp activity up front so the reaper does not stop a model that is
        // still loading.
        self.report(name);
        if let Err(e) = self.controller.start(name).await {
            tracing::error!(model = name, error = %e, "start failed");
            return Err(match e {
                ModelgateError::UnknownModel(_) => AttemptFailure::UnknownModel,
                ModelgateError::Supervisor { message, .. } => AttemptFailure::Supervisor(message),
                other => AttemptFailure::Supervisor(other.to_string()),
            });
        }

        let deadline = began + self.ready_timeout;
        loop {
            match self.controller.is_running(name).await {
                Ok(true) => {
                    self.report(name);
                    tracing::info!(
                        model = name,
                        elapsed_ms = began.elapsed().as_millis() as u64,
                        "model ready"
                    );
                    return Ok(());
                }
                Ok(false) => {}
                Err(e) => tracing::debug!(model = name, error = %e, "status poll failed"),
            }
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    model = name,
                    timeout_secs = self.ready_timeout.as_secs(),
                    "model did not become ready"
                );
                return Err(AttemptFailure::Timeout {
                    waited_secs: self.ready_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    fn report(&self, name: &str) {
        if let Err(e) = self.ledger.report(name) {
            tracing::warn!(model = name, error = %e, "failed to record activity");
        }
    }
}
