//! Replay engine: drains the offline buffer over a freshly opened
//! connection.
//!
//! Replayed heartbeats are identical in shape to live ones but carry
//! `historical: true`.  A short inter-send delay throttles the drain; more
//! than ten consecutive write failures abort it (the transport is about to
//! re-enter backoff anyway).  Only the contiguous successful prefix is
//! removed from the buffer -- an entry is never deleted until its send
//! succeeded.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scribe_protocol::{BufferedMetric, Heartbeat};
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::auth::AuthStore;
use crate::buffer::OfflineBuffer;
use crate::transport::{ConnEvent, Transport};

pub const REPLAY_SEND_DELAY: Duration = Duration::from_millis(10);
pub const MAX_CONSECUTIVE_FAILURES: u32 = 10;
/// How long a live send waits for replay to finish before proceeding.
pub const REPLAY_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// ReplayGate
// ---------------------------------------------------------------------------

/// Coordination point between the replayer and the collector: live
/// heartbeats wait until the post-reconnect replay finished (or timed out).
pub struct ReplayGate {
    replaying: watch::Sender<bool>,
}

impl ReplayGate {
    pub fn new() -> Arc<Self> {
        let (tx, _) = watch::channel(false);
        Arc::new(ReplayGate { replaying: tx })
    }

    /// Called by the supervisor on Streaming entry, before any live send
    /// can observe the new connection.
    pub fn begin(&self) {
        let _ = self.replaying.send(true);
    }

    pub fn finish(&self) {
        let _ = self.replaying.send(false);
    }

    pub fn is_replaying(&self) -> bool {
        *self.replaying.borrow()
    }

    /// Wait until replay is not running, bounded by `timeout`.
    pub async fn wait_clear(&self, timeout: Duration) {
        let mut rx = self.replaying.subscribe();
        let wait = async {
            loop {
                if !*rx.borrow_and_update() {
                    break;
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };
        let _ = tokio::time::timeout(timeout, wait).await;
    }
}

// ---------------------------------------------------------------------------
// Replayer
// ---------------------------------------------------------------------------

pub struct Replayer {
    pub offline: Arc<OfflineBuffer>,
    pub transport: Transport,
    pub auth: Arc<AuthStore>,
    pub gate: Arc<ReplayGate>,
    pub version: String,
    pub connection_address: String,
}

impl Replayer {
    /// Rebuild a full heartbeat from a buffered envelope.  The sample keeps
    /// its original timestamp; only the framing fields are fresh.
    pub fn heartbeat_for(&self, entry: &BufferedMetric) -> Heartbeat {
        Heartbeat {
            agent_id: entry.agent_id.clone(),
            hostname: entry.hostname.clone(),
            metrics: vec![entry.sample.clone()],
            status: "online".to_owned(),
            last_seen_at: Utc::now(),
            processes: entry.top_processes.clone(),
            public_ip: entry.public_ip.clone(),
            load_avg: entry.load_avg,
            connection_address: Some(self.connection_address.clone()),
            system_info: None,
            auth_token: self.auth.current(),
            version: self.version.clone(),
            historical: Some(true),
        }
    }

    /// Replay everything currently buffered, oldest first.
    ///
    /// Returns the length of the successfully delivered prefix.
    pub async fn drain(&self) -> usize {
        let entries = self.offline.load_all();
        if entries.is_empty() {
            self.gate.finish();
            return 0;
        }
        info!(count = entries.len(), "replaying buffered metrics");

        let mut prefix_sent = 0usize;
        let mut prefix_intact = true;
        let mut consecutive_failures = 0u32;

        for entry in &entries {
            let hb = self.heartbeat_for(entry);
            match self.transport.send(&hb).await {
                Ok(()) => {
                    consecutive_failures = 0;
                    if prefix_intact {
                        prefix_sent += 1;
                    }
                    tokio::time::sleep(REPLAY_SEND_DELAY).await;
                }
                Err(e) => {
                    prefix_intact = false;
                    consecutive_failures += 1;
                    if consecutive_failures > MAX_CONSECUTIVE_FAILURES {
                        warn!(error = %e, sent = prefix_sent, "replay aborted after repeated send failures");
                        break;
                    }
                }
            }
        }

        if prefix_sent > 0 {
            self.offline.clear_replayed(prefix_sent);
        }
        info!(sent = prefix_sent, total = entries.len(), "replay finished");
        self.gate.finish();
        prefix_sent
    }
}

/// Long-lived task: drain the buffer every time the connection comes up.
pub async fn run_replayer(
    replayer: Arc<Replayer>,
    mut events: broadcast::Receiver<ConnEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ConnEvent::Connected) => {
                    replayer.drain().await;
                }
                Ok(ConnEvent::Disconnected) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
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
