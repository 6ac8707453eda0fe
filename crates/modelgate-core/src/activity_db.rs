//! Persistent last-activity store using redb.
//!
//! One `ACTIVITY` table maps model name to the unix-millis timestamp of its
//! last observed request. Writes apply the same monotonic-max rule as the
//! in-memory ledger inside the write transaction, so a late write carrying an
//! older timestamp can never regress the stored value.

use std::path::Path;

use chrono::{DateTime, TimeZone, Utc};
use redb::{Database, ReadableTable, TableDefinition};

use crate::error::{ModelgateError, Result};

const ACTIVITY: TableDefinition<&str, i64> = TableDefinition::new("activity");

fn db_err(e: impl std::fmt::Display) -> ModelgateError {
    ModelgateError::LedgerDb(e.to_string())
}

pub struct ActivityDb {
    db: Database,
}

impl ActivityDb {
    /// Open or create the database at `path`, creating the table if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        wt.open_table(ACTIVITY).map_err(db_err)?;
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    /// Store `ts` for `name` unless a later timestamp is already stored.
    /// Returns the value held after the write.
    pub fn record(&self, name: &str, ts: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let stored = {
            let mut table = wt.open_table(ACTIVITY).map_err(db_err)?;
            let existing = table.get(name).map_err(db_err)?.map(|v| v.value());
            let new_ms = ts.timestamp_millis();
            let stored = existing.map_or(new_ms, |old| old.max(new_ms));
            if existing != Some(stored) {
                table.insert(name, stored).map_err(db_err)?;
            }
            stored
        };
        wt.commit().map_err(db_err)?;
        Ok(from_millis(stored))
    }

    pub fn get(&self, name: &str) -> Result<Option<DateTime<Utc>>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ACTIVITY).map_err(db_err)?;
        let value = table.get(name).map_err(db_err)?.map(|v| from_millis(v.value()));
        Ok(value)
    }

    /// All stored records in name order.
    pub fn load_all(&self) -> Result<Vec<(String, DateTime<Utc>)>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ACTIVITY).map_err(db_err)?;
        let mut out = Vec::new();
        for entry in table.iter().map_err(db_err)? {
            let (k, v) = entry.map_err(db_err)?;
            out.push((k.value().to_string(), from_millis(v.value())));
        }
        Ok(out)
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, ActivityDb) {
        let dir = TempDir::new().unwrap();
        let db = ActivityDb::open(&dir.path().join("activity.redb")).unwrap();
        (dir, db)
    }

    #[test]
    fn record_and_get() {
        let (_dir, db) = open_tmp();
        let now = Utc::now();
        db.record("qwen", now).unwrap();
        let got = db.get("qwen").unwrap().unwrap();
        assert_eq!(got.timestamp_millis(), now.timestamp_millis());
        assert!(db.get("llama").unwrap().is_none());
    }

    #[test]
    fn older_write_does_not_regress() {
        let (_dir, db) = open_tmp();
        let now = Utc::now();
        db.record("qwen", now).unwrap();
        let kept = db.record("qwen", now - Duration::minutes(5)).unwrap();
        assert_eq!(kept.timestamp_millis(), now.timestamp_millis());
    }

    #[test]
    fn load_all_is_name_ordered() {
        let (_dir, db) = open_tmp();
        let now = Utc::now();
        db.record("zeta", now).unwrap();
        db.record("alpha", now).unwrap();
        let names: Vec<_> = db.load_all().unwrap().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("activity.redb");
        let now = Utc::now();
        {
            let db = ActivityDb::open(&path).unwrap();
            db.record("qwen", now).unwrap();
        }
        let db = ActivityDb::open(&path).unwrap();
        assert_eq!(
            db.get("qwen").unwrap().unwrap().timestamp_millis(),
            now.timestamp_millis()
        );
    }
}
