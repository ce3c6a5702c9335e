// mock_collector: A mock collector WebSocket endpoint for agent testing.
//
// Accepts agent connections on ws://127.0.0.1:<port>/api/ws/agent/{id},
// records every heartbeat and command reply the agent sends, and lets tests
// inject server frames (commands, token grants, error envelopes) into the
// most recent connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use scribe_protocol::{CommandReply, Heartbeat};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::protocol::Message;

// ---------------------------------------------------------------------------
// Outbound frames to the connected agent
// ---------------------------------------------------------------------------

enum Outbound {
    Text(String),
    Pong(Vec<u8>),
    Close,
}

// ---------------------------------------------------------------------------
// Shared recorder state
// ---------------------------------------------------------------------------

struct CollectorState {
    heartbeats: Mutex<Vec<Heartbeat>>,
    replies: Mutex<Vec<CommandReply>>,
    /// When false, accepted sockets are dropped before the WS handshake so
    /// the agent sees a failed dial (simulated outage).
    accepting: AtomicBool,
    connections: AtomicU64,
    current: Mutex<Option<mpsc::UnboundedSender<Outbound>>>,
}

/// A mock collector for integration testing.
///
/// Binds to a random port; each test spins up its own isolated instance.
pub struct MockCollector {
    addr: SocketAddr,
    state: Arc<CollectorState>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockCollector {
    /// Start the mock collector on a random available port.
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(CollectorState {
            heartbeats: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
            accepting: AtomicBool::new(true),
            connections: AtomicU64::new(0),
            current: Mutex::new(None),
        });

        let loop_state = state.clone();
        let task = tokio::spawn(async move {
            accept_loop(listener, loop_state).await;
        });

        Ok(Self {
            addr,
            state,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// `ws://127.0.0.1:<port>` -- agents append `/api/ws/agent/{id}`.
    pub fn ws_base(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// `127.0.0.1:<port>` for configs that want a bare host.
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// Snapshot of every heartbeat received so far, in arrival order.
    pub async fn heartbeats(&self) -> Vec<Heartbeat> {
        self.state.heartbeats.lock().await.clone()
    }

    /// Snapshot of every command reply received so far.
    pub async fn replies(&self) -> Vec<CommandReply> {
        self.state.replies.lock().await.clone()
    }

    /// Total WS connections accepted since start.
    pub fn connection_count(&self) -> u64 {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Toggle outage simulation: when false, new dials fail.
    pub fn set_accepting(&self, accepting: bool) {
        self.state.accepting.store(accepting, Ordering::SeqCst);
    }

    /// Inject a server frame into the most recent connection.
    ///
    /// Returns false when no agent is connected.
    pub async fn send_command(&self, frame: &serde_json::Value) -> bool {
        self.send_raw(frame.to_string()).await
    }

    pub async fn send_raw(&self, text: String) -> bool {
        let guard = self.state.current.lock().await;
        match guard.as_ref() {
            Some(tx) => tx.send(Outbound::Text(text)).is_ok(),
            None => false,
        }
    }

    /// Close the active connection (the agent will re-dial).
    pub async fn disconnect(&self) {
        let mut guard = self.state.current.lock().await;
        if let Some(tx) = guard.take() {
            let _ = tx.send(Outbound::Close);
        }
    }

    /// Poll until at least `n` heartbeats arrived or `timeout_ms` elapsed.
    pub async fn wait_for_heartbeats(&self, n: usize, timeout_ms: u64) -> bool {
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        loop {
            if self.state.heartbeats.lock().await.len() >= n {
                return true;
            }
            if std::time::Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    /// Poll until at least `n` connections were accepted or timeout.
    pub async fn wait_for_connections(&self, n: u64, timeout_ms: u64) -> bool {
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        loop {
            if self.connection_count() >= n {
                return true;
            }
            if std::time::Instant::now() > deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Accept loop and connection handler
// ---------------------------------------------------------------------------

async fn accept_loop(listener: TcpListener, state: Arc<CollectorState>) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                if !state.accepting.load(Ordering::SeqCst) {
                    // Simulated outage: refuse before the WS handshake.
                    drop(stream);
                    continue;
                }
                let conn_state = state.clone();
                tokio::spawn(async move {
                    let _ = handle_connection(stream, conn_state).await;
                });
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    state: Arc<CollectorState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut write, mut read) = ws_stream.split();

    state.connections.fetch_add(1, Ordering::SeqCst);

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    *state.current.lock().await = Some(tx.clone());

    // Writer: forwards injected frames and pong replies to the agent.
    let writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            let result = match out {
                Outbound::Text(t) => write.send(Message::Text(t.into())).await,
                Outbound::Pong(data) => write.send(Message::Pong(data.into())).await,
                Outbound::Close => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    // Reader: record heartbeats and command replies.
    while let Some(msg_result) = read.next().await {
        let msg = match msg_result {
            Ok(m) => m,
            Err(_) => break,
        };
        match msg {
            Message::Text(text) => {
                if let Ok(hb) = serde_json::from_str::<Heartbeat>(&text) {
                    state.heartbeats.lock().await.push(hb);
                } else if let Ok(reply) = serde_json::from_str::<CommandReply>(&text) {
                    state.replies.lock().await.push(reply);
                }
                // Unrecognized frames are ignored: tests assert on what they
                // expect, not on everything the agent might say.
            }
            Message::Ping(data) => {
                let _ = tx.send(Outbound::Pong(data.into()));
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    writer.abort();
    Ok(())
}
