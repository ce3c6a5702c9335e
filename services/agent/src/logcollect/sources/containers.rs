//! Container log follower.
//!
//! Discovers running containers on a fixed cadence and keeps one tail
//! worker per container, attaching and detaching as the set changes.  The
//! container runtime is platform-specific and sits behind
//! [`ContainerRuntime`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use scribe_protocol::LogEvent;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);
pub const TAIL_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRef {
    pub id: String,
    pub name: String,
}

/// Runtime adapter contract.
pub trait ContainerRuntime: Send + Sync {
    fn list_containers(&self) -> Vec<ContainerRef>;
    /// Log lines for `id` newer than `since`, already shaped as events.
    fn read_logs_since(&self, id: &str, since: DateTime<Utc>) -> Vec<LogEvent>;
}

pub async fn run_container_follower(
    runtime: Arc<dyn ContainerRuntime>,
    tx: mpsc::UnboundedSender<LogEvent>,
    mut shutdown: watch::Receiver<bool>,
    discovery_interval: Duration,
    tail_poll_interval: Duration,
) {
    let mut workers: HashMap<String, watch::Sender<bool>> = HashMap::new();

    loop {
        if *shutdown.borrow() {
            break;
        }

        let current = runtime.list_containers();

        // Attach new containers.
        for container in &current {
            if !workers.contains_key(&container.id) {
                info!(container = %container.name, "attaching container log tail");
                let (stop_tx, stop_rx) = watch::channel(false);
                workers.insert(container.id.clone(), stop_tx);
                tokio::spawn(tail_worker(
                    runtime.clone(),
                    container.clone(),
                    tx.clone(),
                    stop_rx,
                    tail_poll_interval,
                ));
            }
        }

        // Detach gone containers.
        let live_ids: Vec<&String> = current.iter().map(|c| &c.id).collect();
        workers.retain(|id, stop_tx| {
            if live_ids.contains(&id) {
                true
            } else {
                debug!(container_id = %id, "detaching container log tail");
                let _ = stop_tx.send(true);
                false
            }
        });

        tokio::select! {
            _ = tokio::time::sleep(discovery_interval) => {}
            _ = shutdown.changed() => {}
        }
    }

    for (_, stop_tx) in workers {
        let _ = stop_tx.send(true);
    }
}

async fn tail_worker(
    runtime: Arc<dyn ContainerRuntime>,
    container: ContainerRef,
    tx: mpsc::UnboundedSender<LogEvent>,
    mut stop: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    let mut since = Utc::now();
    loop {
        if *stop.borrow() {
            break;
        }
        let events = runtime.read_logs_since(&container.id, since);
        for mut event in events {
            since = since.max(event.timestamp);
            event.source = format!("containers:{}", container.name);
            if tx.send(event).is_err() {
                return;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = stop.changed() => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
