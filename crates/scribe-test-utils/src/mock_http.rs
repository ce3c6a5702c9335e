// mock_http: Mock collector HTTP API.
//
// Serves the four endpoints the agent consumes: registration, log settings,
// gzipped log upload, and update check (plus a binary download route for
// update tests).  All responses are configurable per test.

use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use flate2::read::GzDecoder;
use scribe_protocol::{LogBatch, LogSettings, RegisterRequest, RegisterResponse, UpdateInfo};
use tokio::sync::Mutex;

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

struct HttpState {
    registered: Mutex<Vec<RegisterRequest>>,
    /// When set, registration responds with this canonical id.
    assigned_agent_id: Mutex<Option<String>>,
    log_settings: Mutex<LogSettings>,
    log_batches: Mutex<Vec<LogBatch>>,
    update_info: Mutex<UpdateInfo>,
    update_binary: Mutex<Vec<u8>>,
}

/// Mock HTTP side of the collector.
pub struct MockHttpApi {
    addr: SocketAddr,
    state: Arc<HttpState>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockHttpApi {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let state = Arc::new(HttpState {
            registered: Mutex::new(Vec::new()),
            assigned_agent_id: Mutex::new(None),
            log_settings: Mutex::new(LogSettings::default()),
            log_batches: Mutex::new(Vec::new()),
            update_info: Mutex::new(UpdateInfo {
                available: false,
                version: String::new(),
                url: String::new(),
                checksum: String::new(),
            }),
            update_binary: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/api/register", post(register))
            .route("/api/agents/{id}/log-settings", get(log_settings))
            .route("/api/agents/{id}/logs", post(upload_logs))
            .route("/api/agents/updates/check", get(update_check))
            .route("/download/agent", get(download_binary))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
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

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub async fn registered(&self) -> Vec<RegisterRequest> {
        self.state.registered.lock().await.clone()
    }

    /// Make registration assign a canonical agent id different from the
    /// requested one.
    pub async fn assign_agent_id(&self, id: &str) {
        *self.state.assigned_agent_id.lock().await = Some(id.to_owned());
    }

    pub async fn set_log_settings(&self, settings: LogSettings) {
        *self.state.log_settings.lock().await = settings;
    }

    pub async fn log_batches(&self) -> Vec<LogBatch> {
        self.state.log_batches.lock().await.clone()
    }

    pub async fn set_update(&self, info: UpdateInfo, binary: Vec<u8>) {
        *self.state.update_info.lock().await = info;
        *self.state.update_binary.lock().await = binary;
    }

    /// Poll until at least `n` log batches arrived or `timeout_ms` elapsed.
    pub async fn wait_for_batches(&self, n: usize, timeout_ms: u64) -> bool {
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
        loop {
            if self.state.log_batches.lock().await.len() >= n {
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
// Handlers
// ---------------------------------------------------------------------------

async fn register(
    State(state): State<Arc<HttpState>>,
    Json(req): Json<RegisterRequest>,
) -> Json<RegisterResponse> {
    let assigned = state.assigned_agent_id.lock().await.clone();
    let agent_id = assigned.unwrap_or_else(|| req.agent_id.clone());
    state.registered.lock().await.push(req);
    Json(RegisterResponse { agent_id })
}

async fn log_settings(
    State(state): State<Arc<HttpState>>,
    Path(_id): Path<String>,
) -> Json<LogSettings> {
    Json(state.log_settings.lock().await.clone())
}

async fn upload_logs(
    State(state): State<Arc<HttpState>>,
    Path(_id): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    let mut decoder = GzDecoder::new(&body[..]);
    let mut json = String::new();
    if decoder.read_to_string(&mut json).is_err() {
        return (StatusCode::BAD_REQUEST, "not gzip").into_response();
    }
    match serde_json::from_str::<LogBatch>(&json) {
        Ok(batch) => {
            state.log_batches.lock().await.push(batch);
            (StatusCode::OK, Json(serde_json::json!({"ok": true}))).into_response()
        }
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn update_check(State(state): State<Arc<HttpState>>) -> Json<UpdateInfo> {
    Json(state.update_info.lock().await.clone())
}

async fn download_binary(State(state): State<Arc<HttpState>>) -> Vec<u8> {
    state.update_binary.lock().await.clone()
}
