//! Top-level orchestrator.
//!
//! Every component is constructed explicitly here and wired together at
//! startup -- no process-wide statics.  `run` spawns the long-lived tasks,
//! waits for the shutdown signal, and then executes the graceful shutdown
//! sequence: health writer stops, local ring drains into the offline
//! buffer, the offline buffer flushes to disk, the connection closes, and a
//! state snapshot is written.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use scribe_probes::{HostProbe, Probe};
use scribe_protocol::RegisterRequest;
use scribe_updater::{UpdateChecker, UpdateStatus, CHECK_INTERVAL, FIRST_CHECK_DELAY};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::auth::AuthStore;
use crate::buffer::local::MAX_MEM_ENTRIES;
use crate::buffer::offline::DEFAULT_RING_CAPACITY;
use crate::buffer::{BufferStore, LocalBuffer, OfflineBuffer};
use crate::collector::{self, Collector, HeartbeatTracker};
use crate::commands::{AiBridge, CommandHandler, NoopAiBridge};
use crate::config::AgentConfig;
use crate::health::{HealthState, HealthWriter};
use crate::http::ApiClient;
use crate::identity::{self, AgentIdentity};
use crate::logcollect;
use crate::mode::{Mode, ModeController};
use crate::replay::{ReplayGate, Replayer};
use crate::supervisor::spawn_supervised;
use crate::transport::supervisor::{ConnectionEffects, SupervisorConfig};
use crate::transport::{BackoffPolicy, Transport};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const BUFFER_DB_NAME: &str = "scribe_buffer.db";
const STATE_FILE_NAME: &str = "scribe_state.json";
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);
const REGISTER_ATTEMPTS: u32 = 3;
const REGISTER_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("data directory unusable: {0}")]
    DataDir(String),
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

pub struct Agent {
    cfg: AgentConfig,
    identity: AgentIdentity,
    transport: Transport,
    mode: Arc<ModeController>,
    mode_rx: watch::Receiver<Mode>,
    collector: Arc<Collector>,
    local: Arc<LocalBuffer>,
    offline: Arc<OfflineBuffer>,
    auth: Arc<AuthStore>,
    tracker: Arc<HeartbeatTracker>,
    replay_gate: Arc<ReplayGate>,
    health_state: Arc<HealthState>,
    api: Arc<ApiClient>,
    ai: Arc<dyn AiBridge>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    started_at: Instant,
}

impl Agent {
    /// Construct with the real host probe.
    pub async fn new(cfg: AgentConfig) -> Result<Self, AgentError> {
        Self::with_probe(cfg, Box::new(HostProbe::new())).await
    }

    /// Construct with an explicit probe (tests use the mock).
    pub async fn with_probe(
        cfg: AgentConfig,
        mut probe: Box<dyn Probe>,
    ) -> Result<Self, AgentError> {
        if let Err(e) = std::fs::create_dir_all(&cfg.buffer_data_dir) {
            // Disk tier degrades to memory-only; everything else still works.
            warn!(dir = %cfg.buffer_data_dir.display(), error = %e, "data dir unavailable");
        }

        let mut identity = identity::resolve_identity(probe.as_mut(), cfg.agent_name.as_deref());
        info!(agent_id = %identity.agent_id, hostname = %identity.hostname, "agent identity");

        let api = Arc::new(ApiClient::new(
            cfg.http_base(),
            cfg.api_key.clone(),
            cfg.ssl_verify,
        ));
        if let Some(canonical) = register(&api, &cfg, &identity).await {
            if canonical != identity.agent_id {
                info!(canonical = %canonical, "collector assigned canonical agent id");
                identity.agent_id = canonical;
            }
        }

        let store = if cfg.buffer_enabled && cfg.buffer_disk_enabled {
            let path = cfg.buffer_data_dir.join(BUFFER_DB_NAME);
            match BufferStore::open(&path) {
                Ok(store) => Some(store),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "offline store unavailable, memory-only");
                    None
                }
            }
        } else {
            None
        };

        let offline = Arc::new(OfflineBuffer::new(
            DEFAULT_RING_CAPACITY,
            cfg.buffer_max_duration,
            cfg.buffer_max_size_mb * 1024 * 1024,
            store,
        ));
        let survivors = offline.load_from_disk();
        if survivors > 0 {
            info!(survivors, "offline entries survived the previous run");
        }

        let local = Arc::new(LocalBuffer::new(MAX_MEM_ENTRIES));
        let (mode, mode_rx) = ModeController::new();
        let transport = Transport::new();
        let auth = Arc::new(AuthStore::new(
            cfg.api_key.clone(),
            cfg.auth_token.clone(),
            cfg.config_path.clone(),
        ));
        let tracker = HeartbeatTracker::new();
        let replay_gate = ReplayGate::new();
        let health_state = HealthState::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let collector = Collector::new(
            probe,
            local.clone(),
            offline.clone(),
            transport.clone(),
            mode.clone(),
            identity.clone(),
            auth.clone(),
            tracker.clone(),
            replay_gate.clone(),
            VERSION.to_owned(),
            cfg.server_host.clone(),
            cfg.metrics_interval,
        );

        Ok(Agent {
            cfg,
            identity,
            transport,
            mode,
            mode_rx,
            collector,
            local,
            offline,
            auth,
            tracker,
            replay_gate,
            health_state,
            api,
            ai: Arc::new(NoopAiBridge),
            shutdown_tx,
            shutdown_rx,
            started_at: Instant::now(),
        })
    }

    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn transport(&self) -> Transport {
        self.transport.clone()
    }

    pub fn offline(&self) -> Arc<OfflineBuffer> {
        self.offline.clone()
    }

    pub fn collector(&self) -> Arc<Collector> {
        self.collector.clone()
    }

    /// Replace the AI bridge before `run` (the local AI collaborator wires
    /// itself in here).
    pub fn set_ai_bridge(&mut self, bridge: Arc<dyn AiBridge>) {
        self.ai = bridge;
    }

    /// Spawn every task and block until shutdown completes.
    pub async fn run(self) {
        let backoff = BackoffPolicy::new(self.cfg.reconnect_initial, self.cfg.reconnect_max);
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        // Subscribe before the supervisor can emit the first Connected
        // event, or the replayer would miss it.
        let conn_events = self.transport.subscribe_events();

        // Transport supervisor + inbound command routing.
        let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
        tasks.push(tokio::spawn(crate::transport::supervisor::run_supervisor(
            self.transport.clone(),
            SupervisorConfig {
                hosts: self.cfg.hosts(),
                ssl_enabled: self.cfg.ssl_enabled,
                ssl_verify: self.cfg.ssl_verify,
                agent_id: self.identity.agent_id.clone(),
                backoff: backoff.clone(),
            },
            ConnectionEffects {
                tracker: self.tracker.clone(),
                mode: self.mode.clone(),
                replay_gate: self.replay_gate.clone(),
                health: self.health_state.clone(),
            },
            inbound_tx,
            self.shutdown_rx.clone(),
        )));

        let command_handler = Arc::new(CommandHandler {
            mode: self.mode.clone(),
            collector: self.collector.clone(),
            transport: self.transport.clone(),
            auth: self.auth.clone(),
            agent_id: self.identity.agent_id.clone(),
            shutdown_tx: self.shutdown_tx.clone(),
            ai: self.ai.clone(),
            restart_requested: std::sync::atomic::AtomicBool::new(false),
            allow_respawn: true,
        });
        tasks.push(tokio::spawn(crate::commands::run_command_loop(
            command_handler,
            inbound_rx,
            self.shutdown_rx.clone(),
        )));

        // Metric pipeline, panic-isolated.
        {
            let collector = self.collector.clone();
            let mode_rx = self.mode_rx.clone();
            let shutdown = self.shutdown_rx.clone();
            tasks.push(spawn_supervised(
                "collect-loop",
                backoff.clone(),
                self.shutdown_rx.clone(),
                move || {
                    collector::run_collect_loop(
                        collector.clone(),
                        mode_rx.clone(),
                        shutdown.clone(),
                    )
                },
            ));
        }
        {
            let collector = self.collector.clone();
            let mode_rx = self.mode_rx.clone();
            let shutdown = self.shutdown_rx.clone();
            tasks.push(spawn_supervised(
                "send-loop",
                backoff.clone(),
                self.shutdown_rx.clone(),
                move || {
                    collector::run_send_loop(collector.clone(), mode_rx.clone(), shutdown.clone())
                },
            ));
        }
        {
            let collector = self.collector.clone();
            let shutdown = self.shutdown_rx.clone();
            tasks.push(spawn_supervised(
                "slow-worker",
                backoff.clone(),
                self.shutdown_rx.clone(),
                move || collector::caches::run_slow_worker(collector.clone(), shutdown.clone()),
            ));
        }
        {
            let collector = self.collector.clone();
            let shutdown = self.shutdown_rx.clone();
            tasks.push(spawn_supervised(
                "process-worker",
                backoff.clone(),
                self.shutdown_rx.clone(),
                move || collector::caches::run_process_worker(collector.clone(), shutdown.clone()),
            ));
        }
        {
            let collector = self.collector.clone();
            let shutdown = self.shutdown_rx.clone();
            tasks.push(spawn_supervised(
                "public-ip-worker",
                backoff.clone(),
                self.shutdown_rx.clone(),
                move || {
                    collector::caches::run_public_ip_worker(collector.clone(), shutdown.clone())
                },
            ));
        }

        // Replayer.
        let replayer = Arc::new(Replayer {
            offline: self.offline.clone(),
            transport: self.transport.clone(),
            auth: self.auth.clone(),
            gate: self.replay_gate.clone(),
            version: VERSION.to_owned(),
            connection_address: self.cfg.server_host.clone(),
        });
        tasks.push(tokio::spawn(crate::replay::run_replayer(
            replayer,
            conn_events,
            self.shutdown_rx.clone(),
        )));

        // Buffer pruner.
        {
            let offline = self.offline.clone();
            let mut shutdown = self.shutdown_rx.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(PRUNE_INTERVAL) => offline.prune_old(),
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }));
        }

        // Log pipeline.
        let pipeline = logcollect::spawn_log_pipeline(
            &self.cfg,
            self.identity.agent_id.clone(),
            self.api.clone(),
            self.shutdown_rx.clone(),
        );
        tasks.extend(pipeline.tasks);

        // Health writer.
        if self.cfg.health_file_enabled {
            let writer = HealthWriter {
                path: self.cfg.buffer_data_dir.join(crate::health::HEALTH_FILE_NAME),
                interval: self.cfg.health_file_interval,
                state: self.health_state.clone(),
                identity: self.identity.clone(),
                local: self.local.clone(),
                offline: self.offline.clone(),
                started_at: self.started_at,
            };
            tasks.push(tokio::spawn(crate::health::run_health_writer(
                writer,
                self.shutdown_rx.clone(),
            )));
        }

        // Updater.
        match UpdateChecker::new(self.cfg.http_base(), VERSION) {
            Ok(checker) => {
                tasks.push(tokio::spawn(run_updater(
                    checker,
                    self.shutdown_rx.clone(),
                )));
            }
            Err(e) => warn!(error = %e, "updater disabled: bad version"),
        }

        info!(tasks = tasks.len(), "agent running");

        // Wait for the shutdown signal.
        let mut shutdown_rx = self.shutdown_rx.clone();
        while !*shutdown_rx.borrow() {
            if shutdown_rx.changed().await.is_err() {
                break;
            }
        }

        info!("shutting down");
        // Health writer and the other tasks stop on the signal; the ordered
        // part of the sequence is the data path below.
        for sample in self.local.drain() {
            self.offline.add(self.collector.buffered(sample));
        }
        self.offline.flush_to_disk();
        self.transport.teardown().await;
        self.write_state_snapshot();

        for task in tasks {
            task.abort();
        }
        info!("shutdown complete");
    }

    fn write_state_snapshot(&self) {
        #[derive(Serialize)]
        struct StateSnapshot<'a> {
            timestamp: chrono::DateTime<Utc>,
            agent_id: &'a str,
            hostname: &'a str,
            uptime_sec: u64,
            offline_pending: usize,
            offline_estimated_bytes: u64,
            offline_dropped: u64,
            offline_disk_errors: u64,
            offline_replayed: u64,
            local_dropped: u64,
        }
        let snapshot = StateSnapshot {
            timestamp: Utc::now(),
            agent_id: &self.identity.agent_id,
            hostname: &self.identity.hostname,
            uptime_sec: self.started_at.elapsed().as_secs(),
            offline_pending: self.offline.pending_count(),
            offline_estimated_bytes: self.offline.estimated_size_bytes(),
            offline_dropped: self.offline.dropped_total(),
            offline_disk_errors: self.offline.disk_error_total(),
            offline_replayed: self.offline.replayed_total(),
            local_dropped: self.local.dropped_total(),
        };
        let path = self.cfg.buffer_data_dir.join(STATE_FILE_NAME);
        match serde_json::to_vec_pretty(&snapshot) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(&path, bytes) {
                    warn!(path = %path.display(), error = %e, "state snapshot write failed");
                }
            }
            Err(e) => warn!(error = %e, "state snapshot serialization failed"),
        }
    }
}

// ---------------------------------------------------------------------------
// Registration
// ---------------------------------------------------------------------------

/// Try to register a few times at startup.  Non-fatal: an unreachable
/// collector just means the agent proceeds with its derived id.
async fn register(
    api: &ApiClient,
    cfg: &AgentConfig,
    identity: &AgentIdentity,
) -> Option<String> {
    if cfg.api_key.is_empty() {
        warn!("no API key configured, skipping registration");
        return None;
    }
    let request = RegisterRequest {
        agent_id: identity.agent_id.clone(),
        hostname: identity.hostname.clone(),
        os: std::env::consts::OS.to_owned(),
        tenant_id: cfg.tenant_id.clone(),
    };
    for attempt in 0..REGISTER_ATTEMPTS {
        match api.register(&request).await {
            Ok(response) => return Some(response.agent_id),
            Err(e) => {
                warn!(attempt, error = %e, "registration failed");
                if attempt + 1 < REGISTER_ATTEMPTS {
                    tokio::time::sleep(REGISTER_RETRY_DELAY).await;
                }
            }
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Updater loop
// ---------------------------------------------------------------------------

async fn run_updater(checker: UpdateChecker, mut shutdown: watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(FIRST_CHECK_DELAY) => {}
        _ = shutdown.changed() => {
            if *shutdown.borrow() {
                return;
            }
        }
    }
    loop {
        if *shutdown.borrow() {
            break;
        }
        match checker.check().await {
            Ok(UpdateStatus::Available { version }) => {
                info!(version = %version, "applying update");
                match checker.fetch_info().await {
                    Ok(info) => match std::env::current_exe() {
                        Ok(exe) => match checker.download_and_stage(&info, &exe).await {
                            Ok(staged) => {
                                // Only returns on error; success replaces the
                                // process.
                                if let Err(e) =
                                    UpdateChecker::apply_and_restart(&exe, &staged)
                                {
                                    warn!(error = %e, "update apply failed");
                                }
                            }
                            Err(e) => warn!(error = %e, "update download rejected"),
                        },
                        Err(e) => warn!(error = %e, "cannot locate own binary"),
                    },
                    Err(e) => warn!(error = %e, "update metadata fetch failed"),
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "update check failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(CHECK_INTERVAL) => {}
            _ = shutdown.changed() => {}
        }
    }
}
