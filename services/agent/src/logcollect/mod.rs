//! Log collection pipeline.
//!
//! Sources push raw events into one ingest channel; the gatekeeper filters,
//! the batcher buffers and decides flush timing, and the shipper uploads
//! gzipped batches with retry.  Wiring lives in [`spawn_log_pipeline`].

pub mod batcher;
pub mod gatekeeper;
pub mod settings;
pub mod sources;

use std::path::PathBuf;
use std::sync::Arc;

use scribe_protocol::{LogEvent, Severity};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::AgentConfig;
use crate::http::ApiClient;

pub use batcher::{LogBatcher, LogShipper};
pub use gatekeeper::Gatekeeper;

use sources::file_tailer::{run_file_tailer, LineMapper};

pub struct LogPipeline {
    pub gatekeeper: Arc<Gatekeeper>,
    pub batcher: Arc<LogBatcher>,
    pub tasks: Vec<JoinHandle<()>>,
    /// Handle for OS adapters (event log, containers) wired in by the
    /// platform layer.
    pub ingest_tx: mpsc::UnboundedSender<LogEvent>,
}

/// Wire and start the whole pipeline.
pub fn spawn_log_pipeline(
    cfg: &AgentConfig,
    agent_id: String,
    api: Arc<ApiClient>,
    shutdown: watch::Receiver<bool>,
) -> LogPipeline {
    let gatekeeper = Arc::new(Gatekeeper::new(Severity::Warn));
    let (batcher, flush_rx) = LogBatcher::new(cfg.log_batch_size);
    let (ingest_tx, mut ingest_rx) = mpsc::unbounded_channel::<LogEvent>();
    let mut tasks = Vec::new();

    // Ingest: gatekeeper -> batcher.
    {
        let gatekeeper = gatekeeper.clone();
        let batcher = batcher.clone();
        let mut shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = ingest_rx.recv() => match event {
                        Some(event) => {
                            if gatekeeper.accept(&event) {
                                batcher.push(event);
                            }
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    // Flusher + urgent window reset.
    let shipper = LogShipper {
        api: api.clone(),
        agent_id: agent_id.clone(),
    };
    tasks.push(tokio::spawn(batcher::run_flusher(
        batcher.clone(),
        shipper,
        cfg.log_batch_interval,
        flush_rx,
        shutdown.clone(),
    )));
    tasks.push(tokio::spawn(batcher::run_urgent_reset(
        batcher.clone(),
        shutdown.clone(),
    )));

    // Configured file sources.
    if let Some(path) = &cfg.log_file {
        tasks.push(spawn_tailer(path.clone(), ingest_tx.clone(), shutdown.clone()));
        info!(path = %path.display(), "tailing log file");
    }
    for path in &cfg.security_log_paths {
        let tx = ingest_tx.clone();
        let sd = shutdown.clone();
        let path = path.clone();
        info!(path = %path.display(), "tailing security log");
        tasks.push(tokio::spawn(sources::security::run_security_tailer(
            path, tx, sd,
        )));
    }

    // Settings refresh + dynamically added sources.
    let (new_source_tx, mut new_source_rx) = mpsc::unbounded_channel::<PathBuf>();
    tasks.push(tokio::spawn(settings::run_settings_refresh(
        api,
        agent_id,
        gatekeeper.clone(),
        new_source_tx,
        shutdown.clone(),
        settings::REFRESH_INTERVAL,
    )));
    {
        let ingest_tx = ingest_tx.clone();
        let mut shutdown_rx = shutdown.clone();
        let spawn_shutdown = shutdown;
        tasks.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    path = new_source_rx.recv() => match path {
                        Some(path) => {
                            let _ = spawn_tailer(path, ingest_tx.clone(), spawn_shutdown.clone());
                        }
                        None => break,
                    },
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        }));
    }

    LogPipeline {
        gatekeeper,
        batcher,
        tasks,
        ingest_tx,
    }
}

fn spawn_tailer(
    path: PathBuf,
    tx: mpsc::UnboundedSender<LogEvent>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    let source = format!("file:{}", path.display());
    let mapper: LineMapper =
        Arc::new(move |line| sources::event_from_line(&source, line));
    tokio::spawn(run_file_tailer(path, mapper, tx, shutdown))
}
