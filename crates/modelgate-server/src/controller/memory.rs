use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use modelgate_core::catalog::validate_model_name;
use modelgate_core::{ModelgateError, Result};

use super::ProcessController;

/// In-memory supervisor. Backs `supervisor.kind: memory` and the test suite.
///
/// A started model becomes running after `start_delay_polls` calls to
/// `is_running` have reported it as not yet running, which lets tests script
/// "ready after N polls" without real processes.
#[derive(Debug, Default)]
pub struct MemoryController {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    known: BTreeSet<String>,
    running: BTreeSet<String>,
    pending: HashMap<String, u32>,
    start_delay_polls: u32,
    never_ready: HashSet<String>,
    fail_start: HashSet<String>,
    fail_stop: HashSet<String>,
    start_calls: HashMap<String, u32>,
    stop_calls: HashMap<String, u32>,
    status_calls: HashMap<String, u32>,
}

impl MemoryController {
    pub fn new<I, S>(known: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Mutex::new(Inner {
                known: known.into_iter().map(Into::into).collect(),
                ..Inner::default()
            }),
        }
    }

    pub fn with_start_delay(self, polls: u32) -> Self {
        self.lock().start_delay_polls = polls;
        self
    }

    /// Mark a model as running (or not) behind the orchestrator's back.
    pub fn set_running(&self, name: &str, running: bool) {
        let mut inner = self.lock();
        inner.pending.remove(name);
        if running {
            inner.running.insert(name.to_string());
        } else {
            inner.running.remove(name);
        }
    }

    /// Accept starts for `name` but never report it as running.
    pub fn set_never_ready(&self, name: &str) {
        self.lock().never_ready.insert(name.to_string());
    }

    pub fn set_fail_start(&self, name: &str, fail: bool) {
        toggle(&mut self.lock().fail_start, name, fail);
    }

    pub fn set_fail_stop(&self, name: &str, fail: bool) {
        toggle(&mut self.lock().fail_stop, name, fail);
    }

    pub fn start_calls(&self, name: &str) -> u32 {
        self.lock().start_calls.get(name).copied().unwrap_or(0)
    }

    pub fn stop_calls(&self, name: &str) -> u32 {
        self.lock().stop_calls.get(name).copied().unwrap_or(0)
    }

    pub fn status_calls(&self, name: &str) -> u32 {
        self.lock().status_calls.get(name).copied().unwrap_or(0)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn toggle(set: &mut HashSet<String>, name: &str, on: bool) {
    if on {
        set.insert(name.to_string());
    } else {
        set.remove(name);
    }
}

impl Inner {
    fn ensure_known(&self, name: &str) -> Result<()> {
        validate_model_name(name)?;
        if !self.known.contains(name) {
            return Err(ModelgateError::UnknownModel(name.to_string()));
        }
        Ok(())
    }

    fn begin_start(&mut self, name: &str) {
        if self.running.contains(name) {
            return;
        }
        if self.never_ready.contains(name) {
            self.pending.insert(name.to_string(), u32::MAX);
        } else if self.start_delay_polls == 0 {
            self.running.insert(name.to_string());
        } else {
            self.pending.insert(name.to_string(), self.start_delay_polls);
        }
    }
}

#[async_trait]
impl ProcessController for MemoryController {
    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.lock().known.iter().cloned().collect())
    }

    async fn list_running(&self) -> Result<Vec<String>> {
        Ok(self.lock().running.iter().cloned().collect())
    }

    async fn start(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_known(name)?;
        *inner.start_calls.entry(name.to_string()).or_default() += 1;
        if inner.fail_start.contains(name) {
            return Err(ModelgateError::supervisor(name, "start refused"));
        }
        inner.begin_start(name);
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_known(name)?;
        *inner.stop_calls.entry(name.to_string()).or_default() += 1;
        if inner.fail_stop.contains(name) {
            return Err(ModelgateError::supervisor(name, "stop refused"));
        }
        inner.pending.remove(name);
        inner.running.remove(name);
        Ok(())
    }

    async fn restart(&self, name: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_known(name)?;
        if inner.fail_start.contains(name) {
            return Err(ModelgateError::supervisor(name, "restart refused"));
        }
        inner.running.remove(name);
        inner.begin_start(name);
        Ok(())
    }

    async fn is_running(&self, name: &str) -> Result<bool> {
        let mut inner = self.lock();
        *inner.status_calls.entry(name.to_string()).or_default() += 1;
        if inner.running.contains(name) {
            return Ok(true);
        }
        let Some(remaining) = inner.pending.get_mut(name) else {
            return Ok(false);
        };
        if *remaining == 0 {
            inner.pending.remove(name);
            inner.running.insert(name.to_string());
            return Ok(true);
        }
        if *remaining != u32::MAX {
            *remaining -= 1;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_is_idempotent() {
        let ctl = MemoryController::new(["qwen"]);
        ctl.start("qwen").await.unwrap();
        assert!(ctl.is_running("qwen").await.unwrap());

        ctl.stop("qwen").await.unwrap();
        ctl.stop("qwen").await.unwrap();
        assert!(!ctl.is_running("qwen").await.unwrap());
        assert_eq!(ctl.stop_calls("qwen"), 2);
    }

    #[tokio::test]
    async fn delayed_start_becomes_running_after_polls() {
        let ctl = MemoryController::new(["qwen"]).with_start_delay(2);
        ctl.start("qwen").await.unwrap();
        assert!(!ctl.is_running("qwen").await.unwrap());
        assert!(!ctl.is_running("qwen").await.unwrap());
        assert!(ctl.is_running("qwen").await.unwrap());
    }

    #[tokio::test]
    async fn unknown_model_errors() {
        let ctl = MemoryController::new(["qwen"]);
        assert!(matches!(
            ctl.start("ghost").await,
            Err(ModelgateError::UnknownModel(_))
        ));
        assert!(matches!(
            ctl.stop("ghost").await,
            Err(ModelgateError::UnknownModel(_))
        ));
    }

    #[tokio::test]
    async fn failures_are_supervisor_errors() {
        let ctl = MemoryController::new(["qwen"]);
        ctl.set_fail_start("qwen", true);
        assert!(matches!(
            ctl.start("qwen").await,
            Err(ModelgateError::Supervisor { .. })
        ));
        ctl.set_fail_start("qwen", false);
        ctl.start("qwen").await.unwrap();
        assert_eq!(ctl.start_calls("qwen"), 2);
    }
}
