//! Metric collection and heartbeat assembly.
//!
//! The collect loop ticks at the mode's interval and gathers the cheap
//! counters synchronously; everything expensive comes from the slow caches.
//! Passive samples accumulate in the local ring and go out as one heartbeat
//! per send interval; Active samples are sent individually.  While
//! disconnected, samples flow straight into the offline buffer.

pub mod caches;

use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use scribe_probes::Probe;
use scribe_protocol::{BufferedMetric, Heartbeat, MetricSample, SystemInfo};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::auth::AuthStore;
use crate::buffer::{LocalBuffer, OfflineBuffer};
use crate::identity::AgentIdentity;
use crate::mode::{Mode, ModeController, ACTIVE_INTERVAL, PASSIVE_SEND_INTERVAL};
use crate::replay::{ReplayGate, REPLAY_WAIT_TIMEOUT};
use crate::transport::Transport;

pub use caches::SharedCaches;

/// SystemInfo is re-sent at most this often on a live connection.
pub const SYSTEM_INFO_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Send interval while the agent is disabled by server command.
pub const DISABLED_SEND_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

// ---------------------------------------------------------------------------
// SystemInfo inclusion tracking
// ---------------------------------------------------------------------------

/// Decides which heartbeat carries the SystemInfo descriptor: the first of
/// each connection, then at most once per hour.
pub struct HeartbeatTracker {
    last_sent: Mutex<Option<Instant>>,
}

impl HeartbeatTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(HeartbeatTracker {
            last_sent: Mutex::new(None),
        })
    }

    /// Reset on reconnect so the next heartbeat includes SystemInfo.
    pub fn reset_system_info(&self) {
        if let Ok(mut guard) = self.last_sent.lock() {
            *guard = None;
        }
    }

    /// True when the next heartbeat should carry SystemInfo; marks it sent.
    pub fn system_info_due(&self) -> bool {
        let mut guard = match self.last_sent.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let due = match *guard {
            None => true,
            Some(at) => at.elapsed() >= SYSTEM_INFO_INTERVAL,
        };
        if due {
            *guard = Some(Instant::now());
        }
        due
    }
}

// ---------------------------------------------------------------------------
// Send-interval override (disable command)
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SendOverride {
    interval: RwLock<Option<Duration>>,
}

impl SendOverride {
    pub fn disable(&self) {
        if let Ok(mut guard) = self.interval.write() {
            *guard = Some(DISABLED_SEND_INTERVAL);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.interval.write() {
            *guard = None;
        }
    }

    pub fn send_interval(&self) -> Duration {
        self.interval
            .read()
            .ok()
            .and_then(|g| *g)
            .unwrap_or(PASSIVE_SEND_INTERVAL)
    }
}

// ---------------------------------------------------------------------------
// Collector
// ---------------------------------------------------------------------------

pub struct Collector {
    probe: Mutex<Box<dyn Probe>>,
    pub caches: SharedCaches,
    pub local: Arc<LocalBuffer>,
    pub offline: Arc<OfflineBuffer>,
    pub transport: Transport,
    pub mode: Arc<ModeController>,
    pub identity: AgentIdentity,
    pub auth: Arc<AuthStore>,
    pub tracker: Arc<HeartbeatTracker>,
    pub replay_gate: Arc<ReplayGate>,
    pub send_override: SendOverride,
    pub version: String,
    pub connection_address: String,
    /// Passive-mode collect interval (config `metrics_interval`).
    pub passive_collect_interval: Duration,
}

impl Collector {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        probe: Box<dyn Probe>,
        local: Arc<LocalBuffer>,
        offline: Arc<OfflineBuffer>,
        transport: Transport,
        mode: Arc<ModeController>,
        identity: AgentIdentity,
        auth: Arc<AuthStore>,
        tracker: Arc<HeartbeatTracker>,
        replay_gate: Arc<ReplayGate>,
        version: String,
        connection_address: String,
        passive_collect_interval: Duration,
    ) -> Arc<Self> {
        Arc::new(Collector {
            probe: Mutex::new(probe),
            caches: SharedCaches::default(),
            local,
            offline,
            transport,
            mode,
            identity,
            auth,
            tracker,
            replay_gate,
            send_override: SendOverride::default(),
            version,
            connection_address,
            passive_collect_interval,
        })
    }

    pub(crate) fn lock_probe(&self) -> MutexGuard<'_, Box<dyn Probe>> {
        match self.probe.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// One fast-path sample: cheap counters plus the latest cached slow
    /// readings.
    pub fn collect_sample(&self) -> MetricSample {
        let basic = {
            let mut probe = self.lock_probe();
            probe.sample_basic()
        };
        let slow = self.caches.slow_snapshot();

        MetricSample {
            timestamp: Utc::now(),
            cpu_percent: basic.cpu_percent,
            ram_percent: basic.ram_percent,
            net_in_bps: basic.net_in_bps,
            net_out_bps: basic.net_out_bps,
            disk_read_bps: basic.disk_read_bps,
            disk_write_bps: basic.disk_write_bps,
            ping_ms: self.caches.ping_snapshot(),
            cpu_temp_c: slow.cpu_temp_c,
            gpu_temp_c: slow.gpu_temp_c,
            cpu_name: slow.cpu_name,
            gpu_name: slow.gpu_name,
            is_vm: basic.is_vm,
            disks: basic.disks,
        }
    }

    /// Assemble a live heartbeat around `metrics`.
    pub fn build_heartbeat(&self, metrics: Vec<MetricSample>) -> Heartbeat {
        let system_info = if self.tracker.system_info_due() {
            Some(self.system_info())
        } else {
            None
        };
        Heartbeat {
            agent_id: self.identity.agent_id.clone(),
            hostname: self.identity.hostname.clone(),
            metrics,
            status: "online".to_owned(),
            last_seen_at: Utc::now(),
            processes: self.caches.processes_snapshot(),
            public_ip: self.caches.public_ip_snapshot(),
            load_avg: self.caches.load_avg_snapshot(),
            connection_address: Some(self.connection_address.clone()),
            system_info,
            auth_token: self.auth.current(),
            version: self.version.clone(),
            historical: None,
        }
    }

    pub fn system_info(&self) -> SystemInfo {
        let mut probe = self.lock_probe();
        probe.system_info()
    }

    /// Wrap a sample in the offline-buffer envelope, carrying the cached
    /// snapshots so replay never re-collects.
    pub fn buffered(&self, sample: MetricSample) -> BufferedMetric {
        BufferedMetric {
            agent_id: self.identity.agent_id.clone(),
            hostname: self.identity.hostname.clone(),
            sample,
            top_processes: self.caches.processes_snapshot(),
            load_avg: self.caches.load_avg_snapshot(),
            public_ip: self.caches.public_ip_snapshot(),
            persisted: false,
        }
    }

    fn collect_interval(&self) -> Duration {
        match self.mode.mode() {
            Mode::Active => ACTIVE_INTERVAL,
            Mode::Passive => self.passive_collect_interval,
        }
    }

    /// Spill the local ring into the offline buffer after a failed passive
    /// send.  The ring itself is kept: the next send retries the same batch.
    fn spill_local_to_offline(&self, samples: Vec<MetricSample>) {
        for sample in samples {
            self.offline.add(self.buffered(sample));
        }
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

/// Sampling loop: one tick per collect interval.
pub async fn run_collect_loop(
    collector: Arc<Collector>,
    mut mode_rx: watch::Receiver<Mode>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(collector.collect_interval()) => {}
            // A mode change takes effect no later than the next tick; waking
            // here re-evaluates the interval immediately.
            _ = mode_rx.changed() => {}
            _ = shutdown.changed() => { continue; }
        }
        if *shutdown.borrow() {
            break;
        }

        let sample = collector.collect_sample();

        if !collector.transport.is_connected() {
            collector.offline.add(collector.buffered(sample));
            continue;
        }

        match collector.mode.mode() {
            Mode::Active => {
                collector.replay_gate.wait_clear(REPLAY_WAIT_TIMEOUT).await;
                let hb = collector.build_heartbeat(vec![sample.clone()]);
                if let Err(e) = collector.transport.send(&hb).await {
                    debug!(error = %e, "active send failed, spilling sample");
                    collector.offline.add(collector.buffered(sample));
                }
            }
            Mode::Passive => {
                collector.local.append(sample);
            }
        }
    }
}

/// Passive send loop: one heartbeat per send interval carrying everything
/// the ring accumulated.
pub async fn run_send_loop(
    collector: Arc<Collector>,
    mut mode_rx: watch::Receiver<Mode>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(collector.send_override.send_interval()) => {}
            // Mode changes reset the timer (Active->Passive starts a fresh
            // 60 s window).
            _ = mode_rx.changed() => { continue; }
            _ = shutdown.changed() => { continue; }
        }

        passive_send_once(&collector).await;
    }
}

/// One passive send: everything the ring holds goes out as one heartbeat.
///
/// On failure the ring is kept for the next attempt and the batch is
/// spilled to the offline buffer so a crash before then loses nothing.
/// Returns true when a heartbeat was delivered.
pub async fn passive_send_once(collector: &Arc<Collector>) -> bool {
    if collector.mode.mode() != Mode::Passive {
        return false;
    }
    if !collector.transport.is_connected() {
        return false;
    }

    collector.replay_gate.wait_clear(REPLAY_WAIT_TIMEOUT).await;

    let samples = collector.local.peek();
    if samples.is_empty() {
        return false;
    }
    let hb = collector.build_heartbeat(samples.clone());
    match collector.transport.send(&hb).await {
        Ok(()) => {
            collector.local.clear();
            true
        }
        Err(e) => {
            warn!(error = %e, count = samples.len(), "passive send failed, spilling batch");
            collector.spill_local_to_offline(samples);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
