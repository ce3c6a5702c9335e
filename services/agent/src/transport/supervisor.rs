//! Connection lifecycle state machine.
//!
//! Idle -> Dialing -> Streaming -> Backoff -> Dialing ... until shutdown.
//! On Streaming entry the supervisor performs the required side effects in
//! order (SystemInfo reset, mode to Passive, replay gate armed, health
//! online) before anything else can observe the new connection; on exit it
//! marks the agent offline and computes the next backoff delay.
//!
//! Dial failures rotate through the configured fallback hosts; a success
//! resets the rotation to the primary.

use futures_util::StreamExt;
use scribe_protocol::ServerMessage;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::collector::HeartbeatTracker;
use crate::health::HealthState;
use crate::mode::ModeController;
use crate::replay::ReplayGate;

use super::{conn, BackoffPolicy, ConnEvent, Transport};

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Collector addresses in priority order.
    pub hosts: Vec<String>,
    pub ssl_enabled: bool,
    pub ssl_verify: bool,
    pub agent_id: String,
    pub backoff: BackoffPolicy,
}

impl SupervisorConfig {
    fn url_for(&self, host: &str) -> String {
        let scheme = if self.ssl_enabled { "wss" } else { "ws" };
        format!("{scheme}://{host}/api/ws/agent/{}", self.agent_id)
    }
}

/// Ordered side effects applied on Streaming entry.
pub struct ConnectionEffects {
    pub tracker: Arc<HeartbeatTracker>,
    pub mode: Arc<ModeController>,
    pub replay_gate: Arc<ReplayGate>,
    pub health: Arc<HealthState>,
}

// ---------------------------------------------------------------------------
// Supervisor loop
// ---------------------------------------------------------------------------

pub async fn run_supervisor(
    transport: Transport,
    cfg: SupervisorConfig,
    effects: ConnectionEffects,
    inbound_tx: mpsc::UnboundedSender<ServerMessage>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;
    let mut host_idx: usize = 0;

    while !*shutdown.borrow() {
        let host = cfg.hosts[host_idx % cfg.hosts.len()].clone();
        let url = cfg.url_for(&host);

        match conn::dial(&url, cfg.ssl_enabled, cfg.ssl_verify).await {
            Ok(ws) => {
                attempt = 0;
                host_idx = 0;
                let (sink, mut stream) = ws.split();

                // Arm the replay gate before anything can observe the new
                // connection: no live heartbeat may beat the replay out.
                effects.replay_gate.begin();
                transport.install(sink).await;

                // Remaining Streaming-entry side effects, in order.
                effects.tracker.reset_system_info();
                effects.mode.set_passive("connection established");
                effects.health.set_online(true);
                transport.emit(ConnEvent::Connected);
                info!(host = %host, "collector connection established");

                read_loop(&transport, &mut stream, &inbound_tx, &mut shutdown).await;

                // Streaming exit.
                transport.teardown().await;
                effects.health.set_online(false);
                transport.emit(ConnEvent::Disconnected);
                if *shutdown.borrow() {
                    break;
                }
                warn!(host = %host, "collector connection lost");
            }
            Err(e) => {
                debug!(host = %host, error = %e, "dial failed");
                host_idx = host_idx.wrapping_add(1);
            }
        }

        let delay = cfg.backoff.delay_for_attempt(attempt);
        attempt = attempt.saturating_add(1);
        transport.record_attempt(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "reconnect backoff");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {}
        }
    }

    // Terminal: close the channel and stop.
    transport.teardown().await;
}

// ---------------------------------------------------------------------------
// Read side
// ---------------------------------------------------------------------------

async fn read_loop(
    transport: &Transport,
    stream: &mut futures_util::stream::SplitStream<super::WsStream>,
    inbound_tx: &mpsc::UnboundedSender<ServerMessage>,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
            msg = stream.next() => match msg {
                None => break,
                Some(Err(e)) => {
                    debug!(error = %e, "read error");
                    break;
                }
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(frame) => {
                            if inbound_tx.send(frame).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "unparseable inbound frame ignored");
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    transport.send_pong(data.into()).await;
                }
                Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    }
}
