//! Agent configuration loading.
//!
//! JSON is the config source; a recognized-options mapping with defaults for
//! everything.  A missing or unparseable file falls back to defaults -- the
//! agent always starts.  Environment variables override the file for
//! `SERVER_HOST`, `AGENT_NAME`, `LOG_FILE`, `API_KEY`, `TENANT_ID`, and the
//! buffer knobs; each is also honored with a `SCRIBE_` prefix, which wins
//! when both are set.
//!
//! `librarian_url` is an accepted alternate spelling of `server_host`;
//! scheme and trailing slashes are stripped from it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

// ---------------------------------------------------------------------------
// Validated config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Primary collector address (`host[:port]`, no scheme).
    pub server_host: String,
    /// Prioritized fallback addresses tried round-robin on reconnect.
    pub server_hosts: Vec<String>,
    /// Tenant API key (X-API-Key header + heartbeat token fallback).
    pub api_key: String,
    /// Server-issued per-agent token; persisted back to the file on receipt.
    pub auth_token: Option<String>,
    pub tenant_id: Option<String>,
    /// Overrides the derived hostname when set.
    pub agent_name: Option<String>,

    pub log_file: Option<PathBuf>,
    pub security_log_paths: Vec<PathBuf>,

    /// Passive-mode collect interval.
    pub metrics_interval: Duration,
    pub log_batch_size: usize,
    pub log_batch_interval: Duration,

    pub ssl_enabled: bool,
    pub ssl_verify: bool,

    pub buffer_enabled: bool,
    pub buffer_max_size_mb: u64,
    pub buffer_max_duration: Duration,
    pub buffer_disk_enabled: bool,
    pub buffer_data_dir: PathBuf,

    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,

    pub health_file_enabled: bool,
    pub health_file_interval: Duration,

    /// Path the config was loaded from; auth-token persistence writes here.
    pub config_path: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            server_host: "127.0.0.1:8080".to_owned(),
            server_hosts: Vec::new(),
            api_key: String::new(),
            auth_token: None,
            tenant_id: None,
            agent_name: None,
            log_file: None,
            security_log_paths: Vec::new(),
            metrics_interval: Duration::from_secs(2),
            log_batch_size: 50,
            log_batch_interval: Duration::from_secs(60),
            ssl_enabled: false,
            ssl_verify: true,
            buffer_enabled: true,
            buffer_max_size_mb: 50,
            buffer_max_duration: Duration::from_secs(60 * 60),
            buffer_disk_enabled: true,
            buffer_data_dir: PathBuf::from("/var/lib/scribe"),
            reconnect_initial: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(5 * 60),
            health_file_enabled: true,
            health_file_interval: Duration::from_secs(30),
            config_path: None,
        }
    }
}

impl AgentConfig {
    /// All collector addresses in priority order, primary first.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts = vec![self.server_host.clone()];
        for h in &self.server_hosts {
            if !hosts.contains(h) {
                hosts.push(h.clone());
            }
        }
        hosts
    }

    pub fn ws_url(&self, host: &str, agent_id: &str) -> String {
        let scheme = if self.ssl_enabled { "wss" } else { "ws" };
        format!("{scheme}://{host}/api/ws/agent/{agent_id}")
    }

    pub fn http_base(&self) -> String {
        let scheme = if self.ssl_enabled { "https" } else { "http" };
        format!("{scheme}://{}", self.server_host)
    }
}

// ---------------------------------------------------------------------------
// Raw JSON shape (everything optional)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    server_host: Option<String>,
    server_hosts: Option<Vec<String>>,
    librarian_url: Option<String>,
    api_key: Option<String>,
    auth_token: Option<String>,
    tenant_id: Option<String>,
    agent_name: Option<String>,
    log_file: Option<String>,
    security_log_paths: Option<Vec<String>>,
    metrics_interval: Option<u64>,
    log_batch_size: Option<usize>,
    log_batch_interval: Option<u64>,
    ssl_enabled: Option<bool>,
    ssl_verify: Option<bool>,
    buffer_enabled: Option<bool>,
    buffer_max_size_mb: Option<u64>,
    buffer_max_duration_min: Option<u64>,
    buffer_disk_enabled: Option<bool>,
    buffer_data_dir: Option<String>,
    reconnect_initial_sec: Option<u64>,
    reconnect_max_sec: Option<u64>,
    health_file_enabled: Option<bool>,
    health_file_interval_sec: Option<u64>,
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Load config from `path`, falling back to defaults on any error.
pub fn load_config(path: &Path) -> AgentConfig {
    let raw = match std::fs::read_to_string(path) {
        Ok(text) => match serde_json::from_str::<RawConfig>(&text) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "config parse failed, using defaults");
                RawConfig::default()
            }
        },
        Err(e) => {
            warn!(path = %path.display(), error = %e, "config not readable, using defaults");
            RawConfig::default()
        }
    };
    let mut cfg = resolve(raw);
    cfg.config_path = Some(path.to_path_buf());
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    cfg
}

/// Load config from a JSON string (tests).
pub fn load_config_from_str(json: &str) -> AgentConfig {
    let raw = serde_json::from_str::<RawConfig>(json).unwrap_or_else(|e| {
        warn!(error = %e, "config parse failed, using defaults");
        RawConfig::default()
    });
    resolve(raw)
}

fn resolve(raw: RawConfig) -> AgentConfig {
    let defaults = AgentConfig::default();

    // server_host wins over librarian_url when both are present.
    let server_host = raw
        .server_host
        .or_else(|| raw.librarian_url.as_deref().map(normalize_host))
        .unwrap_or(defaults.server_host);

    AgentConfig {
        server_host,
        server_hosts: raw
            .server_hosts
            .map(|hosts| hosts.iter().map(|h| normalize_host(h)).collect())
            .unwrap_or_default(),
        api_key: raw.api_key.unwrap_or_default(),
        auth_token: raw.auth_token.filter(|t| !t.is_empty()),
        tenant_id: raw.tenant_id.filter(|t| !t.is_empty()),
        agent_name: raw.agent_name.filter(|n| !n.is_empty()),
        log_file: raw.log_file.map(PathBuf::from),
        security_log_paths: raw
            .security_log_paths
            .map(|paths| paths.into_iter().map(PathBuf::from).collect())
            .unwrap_or_default(),
        metrics_interval: raw
            .metrics_interval
            .map(Duration::from_secs)
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.metrics_interval),
        log_batch_size: raw
            .log_batch_size
            .filter(|n| *n > 0)
            .unwrap_or(defaults.log_batch_size),
        log_batch_interval: raw
            .log_batch_interval
            .map(Duration::from_secs)
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.log_batch_interval),
        ssl_enabled: raw.ssl_enabled.unwrap_or(defaults.ssl_enabled),
        ssl_verify: raw.ssl_verify.unwrap_or(defaults.ssl_verify),
        buffer_enabled: raw.buffer_enabled.unwrap_or(defaults.buffer_enabled),
        buffer_max_size_mb: raw
            .buffer_max_size_mb
            .filter(|n| *n > 0)
            .unwrap_or(defaults.buffer_max_size_mb),
        buffer_max_duration: raw
            .buffer_max_duration_min
            .map(|m| Duration::from_secs(m * 60))
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.buffer_max_duration),
        buffer_disk_enabled: raw
            .buffer_disk_enabled
            .unwrap_or(defaults.buffer_disk_enabled),
        buffer_data_dir: raw
            .buffer_data_dir
            .map(PathBuf::from)
            .unwrap_or(defaults.buffer_data_dir),
        reconnect_initial: raw
            .reconnect_initial_sec
            .map(Duration::from_secs)
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.reconnect_initial),
        reconnect_max: raw
            .reconnect_max_sec
            .map(Duration::from_secs)
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.reconnect_max),
        health_file_enabled: raw
            .health_file_enabled
            .unwrap_or(defaults.health_file_enabled),
        health_file_interval: raw
            .health_file_interval_sec
            .map(Duration::from_secs)
            .filter(|d| !d.is_zero())
            .unwrap_or(defaults.health_file_interval),
        config_path: None,
    }
}

/// Strip scheme and trailing slashes from an address-ish string.
fn normalize_host(value: &str) -> String {
    let without_scheme = value
        .trim()
        .strip_prefix("https://")
        .or_else(|| value.trim().strip_prefix("http://"))
        .or_else(|| value.trim().strip_prefix("wss://"))
        .or_else(|| value.trim().strip_prefix("ws://"))
        .unwrap_or_else(|| value.trim());
    without_scheme.trim_end_matches('/').to_owned()
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

fn apply_env_overrides<F: Fn(&str) -> Option<String>>(cfg: &mut AgentConfig, get: F) {
    // The prefixed form wins; the bare form is the documented interface.
    let lookup = |name: &str| get(&format!("SCRIBE_{name}")).or_else(|| get(name));

    if let Some(v) = lookup("SERVER_HOST") {
        cfg.server_host = normalize_host(&v);
    }
    if let Some(v) = lookup("AGENT_NAME") {
        cfg.agent_name = Some(v);
    }
    if let Some(v) = lookup("LOG_FILE") {
        cfg.log_file = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("API_KEY") {
        cfg.api_key = v;
    }
    if let Some(v) = lookup("TENANT_ID") {
        cfg.tenant_id = Some(v);
    }
    if let Some(v) = lookup("BUFFER_ENABLED") {
        cfg.buffer_enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Some(v) = lookup("BUFFER_DISK_ENABLED") {
        cfg.buffer_disk_enabled = v == "1" || v.eq_ignore_ascii_case("true");
    }
    if let Some(v) = lookup("BUFFER_MAX_SIZE_MB") {
        if let Ok(n) = v.parse::<u64>() {
            if n > 0 {
                cfg.buffer_max_size_mb = n;
            }
        }
    }
    if let Some(v) = lookup("BUFFER_MAX_DURATION_MIN") {
        if let Ok(n) = v.parse::<u64>() {
            if n > 0 {
                cfg.buffer_max_duration = Duration::from_secs(n * 60);
            }
        }
    }
    if let Some(v) = lookup("BUFFER_DATA_DIR") {
        cfg.buffer_data_dir = PathBuf::from(v);
    }
}

// ---------------------------------------------------------------------------
// Auth token persistence
// ---------------------------------------------------------------------------

/// Persist (or clear, with `None`) the per-agent auth token in the config
/// file, leaving every other key untouched.
pub fn persist_auth_token(path: &Path, token: Option<&str>) -> std::io::Result<()> {
    let mut value: serde_json::Value = match std::fs::read_to_string(path) {
        Ok(text) => serde_json::from_str(&text).unwrap_or(serde_json::json!({})),
        Err(_) => serde_json::json!({}),
    };
    let obj = value
        .as_object_mut()
        .ok_or_else(|| std::io::Error::other("config root is not an object"))?;
    match token {
        Some(t) => {
            obj.insert("auth_token".to_owned(), serde_json::json!(t));
        }
        None => {
            obj.remove("auth_token");
        }
    }
    let serialized = serde_json::to_string_pretty(&value)
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    std::fs::write(path, serialized)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
