//! Activity Ledger: last-seen timestamp per model.
//!
//! Written on every proxied request (or access-log hit) and read by the idle
//! reaper and the status endpoints. `last_activity` only ever moves forward:
//! concurrent reports resolve to the maximum timestamp, not the last arrival.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::activity_db::ActivityDb;
use crate::catalog::validate_model_name;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRecord {
    pub name: String,
    pub last_activity: DateTime<Utc>,
    pub active: bool,
    pub idle: bool,
}

pub struct Ledger {
    records: Mutex<BTreeMap<String, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
    active_within: Duration,
    idle_after: Duration,
    store: Option<ActivityDb>,
}

impl Ledger {
    pub fn new(active_within: Duration, idle_after: Duration) -> Self {
        Self::with_clock(Arc::new(SystemClock), active_within, idle_after)
    }

    pub fn with_clock(clock: Arc<dyn Clock>, active_within: Duration, idle_after: Duration) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            clock,
            active_within,
            idle_after,
            store: None,
        }
    }

    /// Attach a persistent store, seeding the in-memory map from it.
    pub fn with_store(self, store: ActivityDb) -> Result<Self> {
        let persisted = store.load_all()?;
        {
            let mut records = self.lock();
            for (name, ts) in persisted {
                let slot = records.entry(name).or_insert(ts);
                *slot = (*slot).max(ts);
            }
        }
        Ok(Self {
            store: Some(store),
            ..self
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn active_within(&self) -> Duration {
        self.active_within
    }

    pub fn idle_after(&self) -> Duration {
        self.idle_after
    }

    /// Record "now" as the last activity for `name`.
    pub fn report(&self, name: &str) -> Result<DateTime<Utc>> {
        self.report_at(name, self.clock.now())
    }

    /// Record `ts` as activity for `name`; keeps the later of the stored and
    /// the new value. Returns the value held afterwards.
    pub fn report_at(&self, name: &str, ts: DateTime<Utc>) -> Result<DateTime<Utc>> {
        validate_model_name(name)?;
        let stored = {
            let mut records = self.lock();
            let slot = records.entry(name.to_string()).or_insert(ts);
            *slot = (*slot).max(ts);
            *slot
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.record(name, stored) {
                tracing::warn!(model = name, error = %e, "failed to persist activity");
            }
        }
        Ok(stored)
    }

    /// Insert a record at "now" only if `name` has none yet. Returns true
    /// when a record was created.
    pub fn seed(&self, name: &str) -> Result<bool> {
        validate_model_name(name)?;
        let now = self.clock.now();
        let created = {
            let mut records = self.lock();
            if records.contains_key(name) {
                false
            } else {
                records.insert(name.to_string(), now);
                true
            }
        };
        if created {
            if let Some(store) = &self.store {
                if let Err(e) = store.record(name, now) {
                    tracing::warn!(model = name, error = %e, "failed to persist activity");
                }
            }
        }
        Ok(created)
    }

    pub fn last_activity(&self, name: &str) -> Option<DateTime<Utc>> {
        self.lock().get(name).copied()
    }

    pub fn is_active(&self, name: &str, within: Duration) -> bool {
        let now = self.clock.now();
        self.last_activity(name)
            .is_some_and(|last| now - last < within)
    }

    pub fn is_idle(&self, name: &str, since: Duration) -> bool {
        let now = self.clock.now();
        self.last_activity(name)
            .is_some_and(|last| now - last >= since)
    }

    /// Every record, ordered by name, classified with the default thresholds.
    pub fn snapshot_all(&self) -> Vec<ActivityRecord> {
        let now = self.clock.now();
        let records = self.lock().clone();
        records
            .into_iter()
            .map(|(name, last)| ActivityRecord {
                name,
                last_activity: last,
                active: now - last < self.active_within,
                idle: now - last >= self.idle_after,
            })
            .collect()
    }

    pub fn active_names(&self) -> Vec<String> {
        self.snapshot_all()
            .into_iter()
            .filter(|r| r.active)
            .map(|r| r.name)
            .collect()
    }

    /// Members of `running` that are idle per the default threshold.
    pub fn idle_names(&self, running: &[String]) -> Vec<String> {
        running
            .iter()
            .filter(|n| self.is_idle(n, self.idle_after))
            .cloned()
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, DateTime<Utc>>> {
        // A panic while holding the lock cannot leave the map half-updated:
        // every critical section is a single insert.
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ModelgateError;
    use tempfile::TempDir;

    fn ledger() -> (Arc<ManualClock>, Ledger) {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let ledger = Ledger::with_clock(clock.clone(), Duration::minutes(10), Duration::minutes(30));
        (clock, ledger)
    }

    #[test]
    fn report_rejects_empty_name() {
        let (_clock, ledger) = ledger();
        assert!(matches!(
            ledger.report(""),
            Err(ModelgateError::InvalidModelName(_))
        ));
    }

    #[test]
    fn last_activity_is_max_of_all_reports() {
        let (clock, ledger) = ledger();
        let base = clock.now();
        let stamps = [
            base - Duration::minutes(3),
            base + Duration::minutes(7),
            base - Duration::minutes(40),
            base + Duration::minutes(2),
            base,
        ];
        for ts in stamps {
            ledger.report_at("qwen", ts).unwrap();
        }
        let snapshot = ledger.snapshot_all();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].last_activity, base + Duration::minutes(7));
    }

    #[test]
    fn concurrent_reports_never_regress() {
        let (clock, ledger) = ledger();
        let ledger = Arc::new(ledger);
        let base = clock.now();
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = ledger.clone();
                std::thread::spawn(move || {
                    for j in 0..50 {
                        let offset = (i * 50 + j) % 97;
                        ledger
                            .report_at("qwen", base + Duration::seconds(offset))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(
            ledger.last_activity("qwen"),
            Some(base + Duration::seconds(96))
        );
    }

    #[test]
    fn active_until_window_elapses() {
        let (clock, ledger) = ledger();
        ledger.report("qwen").unwrap();
        assert!(ledger.is_active("qwen", Duration::minutes(10)));

        clock.advance(Duration::minutes(9));
        assert!(ledger.is_active("qwen", Duration::minutes(10)));

        clock.advance(Duration::minutes(1));
        assert!(!ledger.is_active("qwen", Duration::minutes(10)));
    }

    #[test]
    fn idle_boundary_is_inclusive() {
        let (clock, ledger) = ledger();
        ledger.report("qwen").unwrap();
        clock.advance(Duration::minutes(29));
        assert!(!ledger.is_idle("qwen", Duration::minutes(30)));
        clock.advance(Duration::minutes(1));
        assert!(ledger.is_idle("qwen", Duration::minutes(30)));
    }

    #[test]
    fn unknown_names_are_neither_active_nor_idle() {
        let (_clock, ledger) = ledger();
        assert!(!ledger.is_active("ghost", Duration::minutes(10)));
        assert!(!ledger.is_idle("ghost", Duration::minutes(30)));
    }

    #[test]
    fn seed_only_creates_missing_records() {
        let (clock, ledger) = ledger();
        assert!(ledger.seed("qwen").unwrap());
        let first = ledger.last_activity("qwen").unwrap();
        clock.advance(Duration::minutes(5));
        assert!(!ledger.seed("qwen").unwrap());
        assert_eq!(ledger.last_activity("qwen").unwrap(), first);
    }

    #[test]
    fn snapshot_is_sorted_and_classified() {
        let (clock, ledger) = ledger();
        let now = clock.now();
        ledger.report_at("zeta", now).unwrap();
        ledger.report_at("alpha", now - Duration::minutes(45)).unwrap();
        ledger.report_at("mid", now - Duration::minutes(15)).unwrap();

        let snapshot = ledger.snapshot_all();
        let names: Vec<_> = snapshot.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "mid", "zeta"]);
        assert!(snapshot[0].idle && !snapshot[0].active);
        assert!(!snapshot[1].idle && !snapshot[1].active);
        assert!(!snapshot[2].idle && snapshot[2].active);

        assert_eq!(ledger.active_names(), vec!["zeta"]);
        let running = vec!["alpha".to_string(), "zeta".to_string(), "ghost".to_string()];
        assert_eq!(ledger.idle_names(&running), vec!["alpha"]);
    }

    #[test]
    fn store_seeds_and_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.redb");
        let ts = Utc::now() - Duration::minutes(12);
        {
            let db = ActivityDb::open(&path).unwrap();
            let ledger = Ledger::new(Duration::minutes(10), Duration::minutes(30))
                .with_store(db)
                .unwrap();
            ledger.report_at("qwen", ts).unwrap();
        }
        let db = ActivityDb::open(&path).unwrap();
        let ledger = Ledger::new(Duration::minutes(10), Duration::minutes(30))
            .with_store(db)
            .unwrap();
        assert_eq!(
            ledger.last_activity("qwen").unwrap().timestamp_millis(),
            ts.timestamp_millis()
        );
    }
}
