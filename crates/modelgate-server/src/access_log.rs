//! Follows the proxy's access log and turns real traffic into ledger
//! activity, for requests that reach a model without passing the gate.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use modelgate_core::access_log::{model_segment, parse_line};
use modelgate_core::config::AccessLogConfig;
use modelgate_core::ledger::Ledger;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::controller::{read_catalog, SharedCatalog};
use crate::gate::ColdStartGate;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineAction {
    /// Not a request line, or not for a known model.
    Ignored,
    Reported(String),
    /// Reported recently enough that this hit was skipped.
    Debounced(String),
    /// The proxy could not reach the model; a background start was issued.
    ColdStart(String),
}

pub struct AccessLogFollower {
    ledger: Arc<Ledger>,
    gate: ColdStartGate,
    catalog: SharedCatalog,
    debounce: Duration,
    start_on_502: bool,
    last_report: HashMap<String, Instant>,
}

impl AccessLogFollower {
    pub fn new(
        config: &AccessLogConfig,
        ledger: Arc<Ledger>,
        gate: ColdStartGate,
        catalog: SharedCatalog,
    ) -> Self {
        Self {
            ledger,
            gate,
            catalog,
            debounce: Duration::from_secs(config.debounce_secs),
            start_on_502: config.start_on_502,
            last_report: HashMap::new(),
        }
    }

    pub fn handle_line(&mut self, line: &str) -> LineAction {
        let Some(entry) = parse_line(line) else {
            return LineAction::Ignored;
        };
        let Some(name) = model_segment(&entry.uri) else {
            return LineAction::Ignored;
        };
        if !read_catalog(&self.catalog).contains(name) {
            return LineAction::Ignored;
        }
        let name = name.to_string();

        if entry.status == 502 && self.start_on_502 {
            let gate = self.gate.clone();
            let model = name.clone();
            tokio::spawn(async move {
                if let Err(e) = gate.handle(&model).await {
                    tracing::warn!(model = %model, error = %e, "cold start from access log failed");
                }
            });
            return LineAction::ColdStart(name);
        }

        let now = Instant::now();
        if let Some(last) = self.last_report.get(&name) {
            if now.duration_since(*last) < self.debounce {
                return LineAction::Debounced(name);
            }
        }
        if let Err(e) = self.ledger.report_at(&name, entry.time.with_timezone(&Utc)) {
            tracing::warn!(model = %name, error = %e, "failed to record activity");
            return LineAction::Ignored;
        }
        self.last_report.insert(name.clone(), now);
        tracing::debug!(model = %name, status = entry.status, "activity from access log");
        LineAction::Reported(name)
    }

    /// Tail `path` until shutdown, starting at its current end.
    pub async fn run(mut self, path: PathBuf, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(path = %path.display(), "following access log");
        let mut tail = LogTail::new(path);
        let mut ticker = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match tail.read_new().await {
                        Ok(lines) => {
                            for line in lines {
                                self.handle_line(&line);
                            }
                        }
                        Err(e) => tracing::debug!(error = %e, "access log not readable"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }
}

/// Incremental reader over a log file that may be truncated or rotated.
pub struct LogTail {
    path: PathBuf,
    /// `None` until the first read, which skips existing content.
    pos: Option<u64>,
    partial: Vec<u8>,
}

impl LogTail {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            pos: None,
            partial: Vec::new(),
        }
    }

    /// Complete lines appended since the last call.
    pub async fn read_new(&mut self) -> std::io::Result<Vec<String>> {
        let len = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                // Gone mid-rotation: the replacement is read from the start.
                if self.pos.is_some() {
                    self.pos = Some(0);
                    self.partial.clear();
                }
                return Err(e);
            }
        };
        let pos = match self.pos {
            None => {
                self.pos = Some(len);
                return Ok(Vec::new());
            }
            Some(pos) if len < pos => {
                tracing::info!(path = %self.path.display(), "access log truncated or rotated");
                self.partial.clear();
                0
            }
            Some(pos) => pos,
        };
        if len == pos {
            self.pos = Some(pos);
            return Ok(Vec::new());
        }

        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(SeekFrom::Start(pos)).await?;
        let mut buf = Vec::new();
        let read = file.read_to_end(&mut buf).await?;
        self.pos = Some(pos + read as u64);

        self.partial.extend_from_slice(&buf);
        let Some(last_newline) = self.partial.iter().rposition(|b| *b == b'\n') else {
            return Ok(Vec::new());
        };
        let rest = self.partial.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial, rest);
        Ok(String::from_utf8_lossy(&complete)
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(str::to_string)
            .collect())
    }
}
