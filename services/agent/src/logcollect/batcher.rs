//! Log batching, urgent flushes, and rate-limited shipping.
//!
//! Accepted events land in a bounded buffer.  A flush fires when the buffer
//! reaches capacity, the periodic timer expires, or an urgent event
//! (severity >= ERROR) arrives.  Urgent flushes are capped at ten per
//! minute: past the cap, urgent triggers coalesce into the next periodic
//! flush so an error storm cannot DOS the collector.
//!
//! A failed upload retries with 2 s / 4 s / 8 s backoff; after the last
//! retry the batch is re-prepended, bounded to twice the normal capacity.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scribe_protocol::{LogBatch, LogEvent, Severity};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

use crate::http::ApiClient;

pub const URGENT_SEVERITY: Severity = Severity::Error;
pub const MAX_URGENT_PER_MINUTE: u32 = 10;
pub const URGENT_WINDOW: Duration = Duration::from_secs(60);
pub const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(2),
    Duration::from_secs(4),
    Duration::from_secs(8),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Full,
    Periodic,
    Urgent,
}

// ---------------------------------------------------------------------------
// Batcher
// ---------------------------------------------------------------------------

pub struct LogBatcher {
    buf: Mutex<VecDeque<LogEvent>>,
    capacity: usize,
    flush_tx: mpsc::UnboundedSender<FlushReason>,
    urgent_count: AtomicU32,
    dropped: AtomicU64,
}

impl LogBatcher {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::UnboundedReceiver<FlushReason>) {
        let (flush_tx, flush_rx) = mpsc::unbounded_channel();
        (
            Arc::new(LogBatcher {
                buf: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                flush_tx,
                urgent_count: AtomicU32::new(0),
                dropped: AtomicU64::new(0),
            }),
            flush_rx,
        )
    }

    /// Buffer one accepted event, signalling a flush when warranted.
    pub fn push(&self, event: LogEvent) {
        let urgent = event.severity >= URGENT_SEVERITY;
        let full = {
            let mut buf = lock(&self.buf);
            buf.push_back(event);
            buf.len() >= self.capacity
        };

        if full {
            let _ = self.flush_tx.send(FlushReason::Full);
        } else if urgent && self.urgent_allowed() {
            let _ = self.flush_tx.send(FlushReason::Urgent);
        }
    }

    /// Consume an urgent slot; false once the per-minute budget is spent.
    fn urgent_allowed(&self) -> bool {
        let used = self.urgent_count.fetch_add(1, Ordering::SeqCst) + 1;
        if used > MAX_URGENT_PER_MINUTE {
            debug!(used, "urgent flush budget exhausted for this window");
            false
        } else {
            true
        }
    }

    /// Reset the urgent budget; called at minute boundaries.
    pub fn reset_urgent_window(&self) {
        self.urgent_count.store(0, Ordering::SeqCst);
    }

    /// Drain the whole buffer, oldest first.
    pub fn take_batch(&self) -> Vec<LogEvent> {
        lock(&self.buf).drain(..).collect()
    }

    /// Put a failed batch back at the front, bounded to 2x capacity.
    pub fn requeue_front(&self, events: Vec<LogEvent>) {
        let mut buf = lock(&self.buf);
        for event in events.into_iter().rev() {
            buf.push_front(event);
        }
        let bound = self.capacity * 2;
        let mut dropped_now = 0u64;
        while buf.len() > bound {
            buf.pop_front();
            dropped_now += 1;
        }
        if dropped_now > 0 {
            self.dropped.fetch_add(dropped_now, Ordering::Relaxed);
            warn!(dropped = dropped_now, "log buffer overflow, oldest events discarded");
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.buf).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

// ---------------------------------------------------------------------------
// Shipper (upload with retry)
// ---------------------------------------------------------------------------

pub struct LogShipper {
    pub api: Arc<ApiClient>,
    pub agent_id: String,
}

impl LogShipper {
    /// Upload with retries.  Returns false when every attempt failed.
    pub async fn ship(&self, batch: &LogBatch) -> bool {
        match self.api.post_logs(&self.agent_id, batch).await {
            Ok(()) => return true,
            Err(e) => debug!(error = %e, "log upload failed, will retry"),
        }
        for delay in RETRY_DELAYS {
            tokio::time::sleep(delay).await;
            match self.api.post_logs(&self.agent_id, batch).await {
                Ok(()) => return true,
                Err(e) => debug!(error = %e, "log upload retry failed"),
            }
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Flush loop: periodic timer plus flush-now signals.
pub async fn run_flusher(
    batcher: Arc<LogBatcher>,
    shipper: LogShipper,
    interval: Duration,
    mut flush_rx: mpsc::UnboundedReceiver<FlushReason>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let reason = tokio::select! {
            _ = tokio::time::sleep(interval) => FlushReason::Periodic,
            signal = flush_rx.recv() => match signal {
                Some(reason) => reason,
                None => break,
            },
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    // Best-effort final flush.
                    flush_once(&batcher, &shipper).await;
                    break;
                }
                continue;
            }
        };
        debug!(?reason, "log flush");
        flush_once(&batcher, &shipper).await;
    }
}

async fn flush_once(batcher: &LogBatcher, shipper: &LogShipper) {
    let events = batcher.take_batch();
    if events.is_empty() {
        return;
    }
    let batch = LogBatch { logs: events };
    if !shipper.ship(&batch).await {
        warn!(
            events = batch.logs.len(),
            "log batch undeliverable, requeueing"
        );
        batcher.requeue_front(batch.logs);
    }
}

/// Resets the urgent budget every minute.
pub async fn run_urgent_reset(batcher: Arc<LogBatcher>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(URGENT_WINDOW) => {
                batcher.reset_urgent_window();
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
