//! Persistent collector connection.
//!
//! One duplex WebSocket carries outbound heartbeats and command replies and
//! delivers inbound server frames.  All writes go through a single mutex so
//! frames are atomic on the channel; the reconnect supervisor owns the
//! connection lifecycle and is the only code that installs or tears down
//! the sink.
//!
//! Transport errors are never fatal to the process: every failure path
//! lands back in the supervisor's backoff loop.

pub mod backoff;
pub mod conn;
pub mod supervisor;

pub use backoff::BackoffPolicy;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::SinkExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;

pub(crate) type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
pub(crate) type WsSink = futures_util::stream::SplitSink<WsStream, Message>;

// ---------------------------------------------------------------------------
// Errors and state
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected")]
    NotConnected,
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

#[derive(Debug, Clone, Default)]
pub struct TransportState {
    pub connected: bool,
    pub last_connect_time: Option<DateTime<Utc>>,
    pub attempt_count: u32,
}

/// Connection lifecycle notifications for the replayer and friends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnEvent {
    Connected,
    Disconnected,
}

// ---------------------------------------------------------------------------
// Transport handle
// ---------------------------------------------------------------------------

struct TransportShared {
    sink: tokio::sync::Mutex<Option<WsSink>>,
    state: std::sync::Mutex<TransportState>,
    events: broadcast::Sender<ConnEvent>,
}

/// Cheaply cloneable handle to the shared connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<TransportShared>,
}

impl Transport {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(16);
        Transport {
            inner: Arc::new(TransportShared {
                sink: tokio::sync::Mutex::new(None),
                state: std::sync::Mutex::new(TransportState::default()),
                events,
            }),
        }
    }

    /// Serialize `frame` and write it atomically to the channel.
    pub async fn send<T: Serialize>(&self, frame: &T) -> Result<(), TransportError> {
        let json =
            serde_json::to_string(frame).map_err(|e| TransportError::Serialization(e.to_string()))?;
        let mut sink = self.inner.sink.lock().await;
        match sink.as_mut() {
            None => Err(TransportError::NotConnected),
            Some(s) => s
                .send(Message::Text(json.into()))
                .await
                .map_err(|e| TransportError::WriteFailed(e.to_string())),
        }
    }

    pub fn state(&self) -> TransportState {
        match self.inner.state.lock() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnEvent> {
        self.inner.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Supervisor-side mutators
    // -----------------------------------------------------------------------

    pub(crate) async fn install(&self, sink: WsSink) {
        *self.inner.sink.lock().await = Some(sink);
        if let Ok(mut state) = self.inner.state.lock() {
            state.connected = true;
            state.last_connect_time = Some(Utc::now());
            state.attempt_count = 0;
        }
    }

    pub(crate) async fn teardown(&self) {
        let mut sink = self.inner.sink.lock().await;
        if let Some(s) = sink.as_mut() {
            let _ = s.send(Message::Close(None)).await;
        }
        *sink = None;
        drop(sink);
        if let Ok(mut state) = self.inner.state.lock() {
            state.connected = false;
        }
    }

    pub(crate) fn record_attempt(&self, attempt: u32) {
        if let Ok(mut state) = self.inner.state.lock() {
            state.attempt_count = attempt;
        }
    }

    pub(crate) fn emit(&self, event: ConnEvent) {
        let _ = self.inner.events.send(event);
    }

    pub(crate) async fn send_pong(&self, data: Vec<u8>) {
        let mut sink = self.inner.sink.lock().await;
        if let Some(s) = sink.as_mut() {
            let _ = s.send(Message::Pong(data.into())).await;
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
