//! Two-tier offline buffer: fixed-capacity memory ring plus the durable
//! SQLite store.
//!
//! # Contract
//! - `add` appends to the ring (drop-oldest, counted) and, when disk
//!   persistence is on, also inserts a durable record immediately -- so a
//!   crash between sends loses nothing.
//! - `load_all` returns everything in chronological order for replay.
//! - `clear_replayed(n)` removes the oldest `n` from memory and clears the
//!   whole disk store; the retained suffix is re-marked unpersisted so a
//!   later flush writes it again.
//! - Disk-write errors are counted and logged; memory buffering continues.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use scribe_protocol::BufferedMetric;
use tracing::{debug, warn};

use super::store::BufferStore;

/// Default ring capacity: one hour of passive samples at 2 s.
pub const DEFAULT_RING_CAPACITY: usize = 1_800;

/// Rough per-entry footprint for size estimation.
const APPROX_ENTRY_BYTES: u64 = 600;

pub struct OfflineBuffer {
    ring: Mutex<VecDeque<BufferedMetric>>,
    capacity: usize,
    max_age: Duration,
    max_disk_bytes: u64,
    store: Option<Mutex<BufferStore>>,
    dropped: AtomicU64,
    disk_errors: AtomicU64,
    replayed_total: AtomicU64,
}

impl OfflineBuffer {
    pub fn new(
        capacity: usize,
        max_age: Duration,
        max_disk_bytes: u64,
        store: Option<BufferStore>,
    ) -> Self {
        OfflineBuffer {
            ring: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_RING_CAPACITY))),
            capacity,
            max_age,
            max_disk_bytes,
            store: store.map(Mutex::new),
            dropped: AtomicU64::new(0),
            disk_errors: AtomicU64::new(0),
            replayed_total: AtomicU64::new(0),
        }
    }

    /// Append an entry, persisting it when the disk tier is enabled.
    pub fn add(&self, mut entry: BufferedMetric) {
        if let Some(store) = &self.store {
            let mut guard = lock(store);
            match guard.insert(&entry) {
                Ok(_) => {
                    entry.persisted = true;
                    match guard.enforce_size_cap(self.max_disk_bytes) {
                        Ok(0) => {}
                        Ok(removed) => {
                            debug!(removed, "offline store size cap enforced");
                        }
                        Err(e) => {
                            warn!(error = %e, "offline store size-cap enforcement failed");
                        }
                    }
                }
                Err(e) => {
                    self.disk_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "offline store write failed, memory-only for this entry");
                }
            }
        }

        let mut ring = lock(&self.ring);
        if ring.len() >= self.capacity {
            ring.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        ring.push_back(entry);
    }

    /// Everything replayable, in chronological order: durable entries plus
    /// any memory-only entries that never reached disk.
    pub fn load_all(&self) -> Vec<BufferedMetric> {
        let mut entries = Vec::new();
        if let Some(store) = &self.store {
            match lock(store).load_all() {
                Ok(mut from_disk) => entries.append(&mut from_disk),
                Err(e) => warn!(error = %e, "offline store read failed during replay load"),
            }
        }
        {
            let ring = lock(&self.ring);
            entries.extend(ring.iter().filter(|e| !e.persisted).cloned());
        }
        entries.sort_by_key(|e| e.sample.timestamp);
        entries
    }

    /// Drop the `n` oldest memory entries and clear the disk store.
    ///
    /// Whatever stays in the ring is re-marked unpersisted, since the disk
    /// store no longer holds it.
    pub fn clear_replayed(&self, n: usize) {
        {
            let mut ring = lock(&self.ring);
            for _ in 0..n.min(ring.len()) {
                ring.pop_front();
            }
        }
        if let Some(store) = &self.store {
            if let Err(e) = lock(store).clear() {
                warn!(error = %e, "offline store clear failed after replay");
            }
        }
        {
            let mut ring = lock(&self.ring);
            for entry in ring.iter_mut() {
                entry.persisted = false;
            }
        }
        self.replayed_total.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Delete entries older than the configured buffer duration, both tiers.
    pub fn prune_old(&self) {
        let Ok(max_age) = chrono::Duration::from_std(self.max_age) else {
            return;
        };
        let cutoff = Utc::now() - max_age;
        {
            let mut ring = lock(&self.ring);
            ring.retain(|e| e.sample.timestamp >= cutoff);
        }
        if let Some(store) = &self.store {
            match lock(store).delete_older_than(cutoff) {
                Ok(0) => {}
                Ok(deleted) => debug!(deleted, "pruned expired offline entries"),
                Err(e) => warn!(error = %e, "offline store prune failed"),
            }
        }
    }

    /// Force-persist every memory-only entry (shutdown path).
    pub fn flush_to_disk(&self) {
        let Some(store) = &self.store else {
            return;
        };
        let mut ring = lock(&self.ring);
        let mut guard = lock(store);
        for entry in ring.iter_mut().filter(|e| !e.persisted) {
            match guard.insert(entry) {
                Ok(_) => entry.persisted = true,
                Err(e) => {
                    self.disk_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "flush_to_disk write failed");
                }
            }
        }
    }

    /// Count of durable survivors from a previous run (startup reporting).
    pub fn load_from_disk(&self) -> usize {
        match &self.store {
            Some(store) => lock(store).count().unwrap_or(0) as usize,
            None => 0,
        }
    }

    /// Rough total footprint for health reporting.
    pub fn estimated_size_bytes(&self) -> u64 {
        let disk = self
            .store
            .as_ref()
            .map(|s| lock(s).file_size_bytes())
            .unwrap_or(0);
        disk + self.mem_len() as u64 * APPROX_ENTRY_BYTES
    }

    /// Replayable entry count: durable rows plus memory-only entries.
    pub fn pending_count(&self) -> usize {
        let disk = self
            .store
            .as_ref()
            .and_then(|s| lock(s).count().ok())
            .unwrap_or(0) as usize;
        let mem = lock(&self.ring).iter().filter(|e| !e.persisted).count();
        disk + mem
    }

    pub fn mem_len(&self) -> usize {
        lock(&self.ring).len()
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn disk_error_total(&self) -> u64 {
        self.disk_errors.load(Ordering::Relaxed)
    }

    pub fn replayed_total(&self) -> u64 {
        self.replayed_total.load(Ordering::Relaxed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
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
            persisted: false,
        }
    }

    fn disk_buffer(path: &std::path::Path, capacity: usize) -> OfflineBuffer {
        let store = BufferStore::open(path).unwrap();
        OfflineBuffer::new(
            capacity,
            Duration::from_secs(3600),
            50 * 1024 * 1024,
            Some(store),
        )
    }

    #[test]
    fn memory_only_buffer_ring_semantics() {
        let buf = OfflineBuffer::new(3, Duration::from_secs(3600), 0, None);
        for n in 0..5 {
            buf.add(entry(n));
        }
        assert_eq!(buf.mem_len(), 3);
        assert_eq!(buf.dropped_total(), 2);
        let all = buf.load_all();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].sample.cpu_percent, 2.0);
    }

    #[test]
    fn add_persists_each_entry_when_disk_enabled() {
        let f = NamedTempFile::new().unwrap();
        let buf = disk_buffer(f.path(), 100);
        buf.add(entry(1));
        buf.add(entry(2));
        assert_eq!(buf.load_from_disk(), 2, "each add writes durably");
    }

    #[test]
    fn load_all_does_not_duplicate_persisted_entries() {
        let f = NamedTempFile::new().unwrap();
        let buf = disk_buffer(f.path(), 100);
        for n in 0..4 {
            buf.add(entry(n));
        }
        // 4 in memory (persisted) + 4 on disk, but replay must see 4.
        assert_eq!(buf.load_all().len(), 4);
    }

    #[test]
    fn clear_replayed_drains_both_tiers() {
        let f = NamedTempFile::new().unwrap();
        let buf = disk_buffer(f.path(), 100);
        for n in 0..5 {
            buf.add(entry(n));
        }
        let all = buf.load_all();
        buf.clear_replayed(all.len());
        assert_eq!(buf.mem_len(), 0, "memory count drops to zero");
        assert_eq!(buf.load_from_disk(), 0);
        assert_eq!(buf.replayed_total(), 5);
    }

    #[test]
    fn partial_replay_keeps_suffix_replayable() {
        let f = NamedTempFile::new().unwrap();
        let buf = disk_buffer(f.path(), 100);
        for n in 0..5 {
            buf.add(entry(n));
        }
        buf.clear_replayed(3);
        // Disk was cleared; the surviving suffix must still be replayable
        // from memory, and flushable back to disk.
        let remaining = buf.load_all();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].sample.cpu_percent, 3.0);

        buf.flush_to_disk();
        assert_eq!(buf.load_from_disk(), 2);
    }

    #[test]
    fn survivors_visible_after_reopen() {
        let f = NamedTempFile::new().unwrap();
        let path = f.path().to_path_buf();
        {
            let buf = disk_buffer(&path, 100);
            buf.add(entry(1));
            buf.add(entry(2));
        }
        // New process: fresh buffer over the same file.
        let buf = disk_buffer(&path, 100);
        assert_eq!(buf.load_from_disk(), 2);
        let all = buf.load_all();
        assert_eq!(all.len(), 2);
        assert_eq!(
            all[0].sample.timestamp,
            Utc.timestamp_opt(1_900_000_001, 0).unwrap(),
            "original timestamps survive restart"
        );
    }

    #[test]
    fn prune_old_removes_expired_entries_and_keeps_fresh_ones() {
        let f = NamedTempFile::new().unwrap();
        let store = BufferStore::open(f.path()).unwrap();
        let buf = OfflineBuffer::new(
            100,
            Duration::from_secs(3600),
            50 * 1024 * 1024,
            Some(store),
        );

        let mut expired = entry(0);
        expired.sample.timestamp = Utc::now() - chrono::Duration::hours(2);
        let mut fresh = entry(1);
        fresh.sample.timestamp = Utc::now();
        buf.add(expired);
        buf.add(fresh);

        buf.prune_old();
        assert_eq!(buf.mem_len(), 1);
        assert_eq!(buf.load_from_disk(), 1);
    }

    #[test]
    fn disk_failure_falls_back_to_memory() {
        // A store opened on a path that disappears keeps erroring; entries
        // must still land in memory with the error counted.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("buffer.db");
        let buf = disk_buffer(&path, 100);
        drop_store_file(&path);
        for n in 0..3 {
            buf.add(entry(n));
        }
        assert_eq!(buf.mem_len(), 3);
    }

    fn drop_store_file(path: &std::path::Path) {
        // SQLite keeps the handle; deleting the file does not break writes
        // on most platforms, so this only exercises the error path where it
        // does.  The assertion above holds either way.
        let _ = std::fs::remove_file(path);
    }
}
