//! Liveness file writer.
//!
//! Every `health_interval` the agent writes a small JSON file that external
//! supervisors (init systems, monitoring daemons) read to decide whether the
//! agent is alive and connected.  The file is the sole liveness interface.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::warn;

use crate::buffer::{LocalBuffer, OfflineBuffer};
use crate::identity::AgentIdentity;

pub const HEALTH_FILE_NAME: &str = "scribe_health.json";

// ---------------------------------------------------------------------------
// Shared online/offline flag
// ---------------------------------------------------------------------------

pub struct HealthState {
    online: AtomicBool,
}

impl HealthState {
    pub fn new() -> Arc<Self> {
        Arc::new(HealthState {
            online: AtomicBool::new(false),
        })
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// File payload
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthPayload {
    pub timestamp: DateTime<Utc>,
    pub status: String,
    pub agent_id: String,
    pub hostname: String,
    pub buffer_count: usize,
    pub uptime_sec: u64,
    pub pid: u32,
}

// ---------------------------------------------------------------------------
// Writer task
// ---------------------------------------------------------------------------

pub struct HealthWriter {
    pub path: PathBuf,
    pub interval: Duration,
    pub state: Arc<HealthState>,
    pub identity: AgentIdentity,
    pub local: Arc<LocalBuffer>,
    pub offline: Arc<OfflineBuffer>,
    pub started_at: Instant,
}

impl HealthWriter {
    pub fn payload(&self) -> HealthPayload {
        HealthPayload {
            timestamp: Utc::now(),
            status: if self.state.is_online() {
                "online".to_owned()
            } else {
                "offline".to_owned()
            },
            agent_id: self.identity.agent_id.clone(),
            hostname: self.identity.hostname.clone(),
            buffer_count: self.offline.pending_count() + self.local.len(),
            uptime_sec: self.started_at.elapsed().as_secs(),
            pid: std::process::id(),
        }
    }

    pub fn write_once(&self) {
        let payload = self.payload();
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&self.path, bytes) {
                    warn!(path = %self.path.display(), error = %e, "health file write failed");
                }
            }
            Err(e) => warn!(error = %e, "health payload serialization failed"),
        }
    }
}

pub async fn run_health_writer(writer: HealthWriter, mut shutdown: watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        writer.write_once();
        tokio::select! {
            _ = tokio::time::sleep(writer.interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn writer(dir: &std::path::Path, state: Arc<HealthState>) -> HealthWriter {
        HealthWriter {
            path: dir.join(HEALTH_FILE_NAME),
            interval: Duration::from_secs(30),
            state,
            identity: AgentIdentity {
                agent_id: "host-aa:bb".to_owned(),
                hostname: "host".to_owned(),
            },
            local: Arc::new(LocalBuffer::new(10)),
            offline: Arc::new(OfflineBuffer::new(
                10,
                Duration::from_secs(3600),
                0,
                None,
            )),
            started_at: Instant::now(),
        }
    }

    #[test]
    fn payload_reflects_online_flag() {
        let dir = tempfile::tempdir().unwrap();
        let state = HealthState::new();
        let w = writer(dir.path(), state.clone());

        assert_eq!(w.payload().status, "offline");
        state.set_online(true);
        assert_eq!(w.payload().status, "online");
    }

    #[test]
    fn write_once_produces_parseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let w = writer(dir.path(), HealthState::new());
        w.write_once();

        let text = std::fs::read_to_string(dir.path().join(HEALTH_FILE_NAME)).unwrap();
        let payload: HealthPayload = serde_json::from_str(&text).unwrap();
        assert_eq!(payload.agent_id, "host-aa:bb");
        assert_eq!(payload.pid, std::process::id());
    }
}
