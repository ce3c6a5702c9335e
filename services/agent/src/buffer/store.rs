//! Durable SQLite store backing the offline buffer.
//!
//! # SQLite durability settings
//! Applied at open: WAL, synchronous=FULL, wal_autocheckpoint=1000.
//! PRAGMA integrity_check runs at open; returns error if it fails.
//!
//! # Size cap
//! The database file is bounded by `max_size_bytes`; when exceeded, the
//! oldest 10% of rows by timestamp are deleted in a single transaction.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use scribe_protocol::BufferedMetric;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// BufferStore
// ---------------------------------------------------------------------------

/// The durable store for one agent instance.
pub struct BufferStore {
    conn: Connection,
    path: PathBuf,
}

impl BufferStore {
    /// Open (or create) the store at `path`.
    ///
    /// Applies PRAGMAs, runs `PRAGMA integrity_check`, and creates the
    /// schema if needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        run_integrity_check(&conn)?;
        conn.execute_batch(include_str!("schema.sql"))?;
        Ok(BufferStore {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Insert one entry; returns its row id.
    pub fn insert(&mut self, entry: &BufferedMetric) -> Result<i64, StoreError> {
        let payload = serde_json::to_string(entry)?;
        self.conn.execute(
            "INSERT INTO buffer (timestamp, agent_id, hostname, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                entry.sample.timestamp.to_rfc3339(),
                entry.agent_id,
                entry.hostname,
                payload,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All entries in chronological order.
    pub fn load_all(&self) -> Result<Vec<BufferedMetric>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT payload FROM buffer ORDER BY timestamp ASC, id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut entries = Vec::new();
        for row in rows {
            let payload = row?;
            entries.push(serde_json::from_str(&payload)?);
        }
        Ok(entries)
    }

    pub fn count(&self) -> Result<i64, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM buffer", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete everything (replay acknowledged the drained chunk).
    pub fn clear(&mut self) -> Result<(), StoreError> {
        self.conn.execute("DELETE FROM buffer", [])?;
        Ok(())
    }

    /// Delete entries whose sample timestamp is older than `cutoff`.
    pub fn delete_older_than(&mut self, cutoff: DateTime<Utc>) -> Result<i64, StoreError> {
        let deleted = self.conn.execute(
            "DELETE FROM buffer WHERE timestamp < ?1",
            params![cutoff.to_rfc3339()],
        )?;
        Ok(deleted as i64)
    }

    /// On-disk footprint in bytes: main database file plus the WAL, which
    /// holds recent commits until a checkpoint folds them in.
    pub fn file_size_bytes(&self) -> u64 {
        let main = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        let mut wal_name = self.path.as_os_str().to_owned();
        wal_name.push("-wal");
        let wal = std::fs::metadata(std::path::Path::new(&wal_name))
            .map(|m| m.len())
            .unwrap_or(0);
        main + wal
    }

    /// Enforce the size cap: when the file exceeds `max_size_bytes`, delete
    /// the oldest 10% of rows by timestamp in one transaction.
    ///
    /// Returns the number of rows removed.
    pub fn enforce_size_cap(&mut self, max_size_bytes: u64) -> Result<i64, StoreError> {
        if self.file_size_bytes() <= max_size_bytes {
            return Ok(0);
        }
        let total = self.count()?;
        let limit = (total / 10).max(1);

        let tx = self.conn.transaction()?;
        let deleted = tx.execute(
            "DELETE FROM buffer WHERE id IN (
                 SELECT id FROM buffer ORDER BY timestamp ASC, id ASC LIMIT ?1
             )",
            params![limit],
        )?;
        tx.commit()?;

        // Reclaim file space outside the transaction.
        self.conn.execute_batch("VACUUM;")?;
        Ok(deleted as i64)
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn apply_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=FULL;
         PRAGMA wal_autocheckpoint=1000;",
    )?;
    Ok(())
}

fn run_integrity_check(conn: &Connection) -> Result<(), StoreError> {
    let result: String = conn.pragma_query_value(None, "integrity_check", |row| row.get(0))?;
    if result != "ok" {
        return Err(StoreError::IntegrityCheckFailed(result));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use scribe_protocol::MetricSample;
    use tempfile::NamedTempFile;

    fn entry(ts_offset: i64) -> BufferedMetric {
        BufferedMetric {
            agent_id: "agent-1".to_owned(),
            hostname: "host".to_owned(),
            sample: MetricSample {
                timestamp: Utc.timestamp_opt(1_900_000_000 + ts_offset, 0).unwrap(),
                cpu_percent: ts_offset as f32,
                ram_percent: 0.0,
                net_in_bps: 0,
                net_out_bps: 0,
                disk_read_bps: 0,
                disk_write_bps: 0,
                ping_ms: None,
                cpu_temp_c: None,
                gpu_temp_c: None,
                cpu_name: None,
                gpu_name: None,
                is_vm: false,
                disks: vec![],
            },
            top_processes: vec![],
            load_avg: None,
            public_ip: None,
            persisted: true,
        }
    }

    #[test]
    fn wal_and_sync_full_are_set() {
        let f = NamedTempFile::new().unwrap();
        let _store = BufferStore::open(f.path()).unwrap();

        let conn = Connection::open(f.path()).unwrap();
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |r| r.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        let sync: i64 = conn
            .pragma_query_value(None, "synchronous", |r| r.get(0))
            .unwrap();
        assert_eq!(sync, 2, "synchronous must be FULL (2)");
    }

    #[test]
    fn entries_survive_close_and_reopen() {
        let f = NamedTempFile::new().unwrap();
        let path = f.path().to_path_buf();
        {
            let mut store = BufferStore::open(&path).unwrap();
            store.insert(&entry(1)).unwrap();
            store.insert(&entry(2)).unwrap();
        }
        {
            let store = BufferStore::open(&path).unwrap();
            let all = store.load_all().unwrap();
            assert_eq!(all.len(), 2, "entries must survive reopen");
            assert_eq!(all[0].sample.cpu_percent, 1.0);
        }
    }

    #[test]
    fn load_all_is_chronological_regardless_of_insert_order() {
        let f = NamedTempFile::new().unwrap();
        let mut store = BufferStore::open(f.path()).unwrap();
        store.insert(&entry(5)).unwrap();
        store.insert(&entry(1)).unwrap();
        store.insert(&entry(3)).unwrap();

        let all = store.load_all().unwrap();
        let times: Vec<_> = all.iter().map(|e| e.sample.timestamp).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }

    #[test]
    fn timestamps_round_trip_bit_exact() {
        let f = NamedTempFile::new().unwrap();
        let mut store = BufferStore::open(f.path()).unwrap();
        let original = entry(42);
        store.insert(&original).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded[0].sample.timestamp, original.sample.timestamp);
    }

    #[test]
    fn delete_older_than_prunes_both_sides_of_cutoff() {
        let f = NamedTempFile::new().unwrap();
        let mut store = BufferStore::open(f.path()).unwrap();
        for n in 0..10 {
            store.insert(&entry(n)).unwrap();
        }
        let cutoff = Utc.timestamp_opt(1_900_000_005, 0).unwrap();
        let deleted = store.delete_older_than(cutoff).unwrap();
        assert_eq!(deleted, 5);
        assert_eq!(store.count().unwrap(), 5);
    }

    #[test]
    fn size_cap_prunes_oldest_tenth() {
        let f = NamedTempFile::new().unwrap();
        let mut store = BufferStore::open(f.path()).unwrap();
        for n in 0..100 {
            store.insert(&entry(n)).unwrap();
        }
        // A 1-byte cap forces pruning.
        let removed = store.enforce_size_cap(1).unwrap();
        assert_eq!(removed, 10, "oldest 10% pruned");
        let survivors = store.load_all().unwrap();
        assert_eq!(survivors.len(), 90);
        assert_eq!(
            survivors[0].sample.timestamp,
            Utc.timestamp_opt(1_900_000_010, 0).unwrap(),
            "oldest survivors start after the pruned prefix"
        );
    }

    #[test]
    fn clear_removes_everything() {
        let f = NamedTempFile::new().unwrap();
        let mut store = BufferStore::open(f.path()).unwrap();
        store.insert(&entry(1)).unwrap();
        store.clear().unwrap();
        assert_eq!(store.count().unwrap(), 0);
    }
}
