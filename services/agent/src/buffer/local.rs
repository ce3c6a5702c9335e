//! Passive-mode sample ring.
//!
//! Small fixed-capacity ring used only between passive sends.  Overflow
//! drops the oldest sample and counts it.  Not persisted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use scribe_protocol::MetricSample;

/// Ring capacity: the hard ceiling on metrics per heartbeat.
pub const MAX_MEM_ENTRIES: usize = 150;

pub struct LocalBuffer {
    ring: Mutex<VecDeque<MetricSample>>,
    capacity: usize,
    dropped: AtomicU64,
}

impl LocalBuffer {
    pub fn new(capacity: usize) -> Self {
        LocalBuffer {
            ring: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn append(&self, sample: MetricSample) {
        let mut ring = match self.ring.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if ring.len() >= self.capacity {
            ring.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        ring.push_back(sample);
    }

    /// Remove and return everything, oldest first.
    pub fn drain(&self) -> Vec<MetricSample> {
        let mut ring = match self.ring.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        ring.drain(..).collect()
    }

    /// Clone everything without removing, oldest first.  Used to build a
    /// heartbeat that must survive a failed send.
    pub fn peek(&self) -> Vec<MetricSample> {
        let ring = match self.ring.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        ring.iter().cloned().collect()
    }

    pub fn clear(&self) {
        let mut ring = match self.ring.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        ring.clear();
    }

    pub fn len(&self) -> usize {
        match self.ring.lock() {
            Ok(g) => g.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample(n: i64) -> MetricSample {
        MetricSample {
            timestamp: Utc.timestamp_opt(1_900_000_000 + n, 0).unwrap(),
            cpu_percent: n as f32,
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
        }
    }

    #[test]
    fn append_and_drain_preserve_order() {
        let buf = LocalBuffer::new(10);
        for n in 0..3 {
            buf.append(sample(n));
        }
        let drained = buf.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].cpu_percent, 0.0);
        assert_eq!(drained[2].cpu_percent, 2.0);
        assert!(buf.is_empty());
    }

    #[test]
    fn overflow_drops_oldest_and_counts() {
        let buf = LocalBuffer::new(3);
        for n in 0..5 {
            buf.append(sample(n));
        }
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.dropped_total(), 2);
        let kept = buf.peek();
        assert_eq!(kept[0].cpu_percent, 2.0, "oldest two were dropped");
    }

    #[test]
    fn peek_does_not_consume() {
        let buf = LocalBuffer::new(10);
        buf.append(sample(1));
        assert_eq!(buf.peek().len(), 1);
        assert_eq!(buf.len(), 1);
        buf.clear();
        assert!(buf.is_empty());
    }
}
