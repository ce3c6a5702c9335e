// scribe-protocol: Agent <-> collector wire types and serialization.
//
// Outbound frames (heartbeats, command replies) are plain JSON objects.
// Inbound frames carry no discriminator field, so the inbound union
// deserializes untagged: a frame is a command, a bare auth-token grant, or
// an error envelope depending on which keys are present.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metric types
// ---------------------------------------------------------------------------

/// Per-partition usage and throughput inside a [`MetricSample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskSample {
    /// Mount point, e.g. `/` or `C:\`.
    pub mount: String,
    /// Backing device name, e.g. `nvme0n1p2`.
    pub device: String,
    pub usage_percent: f32,
    pub read_bps: u64,
    pub write_bps: u64,
}

/// One timestamped snapshot of host telemetry.
///
/// Rate fields (`net_*_bps`, `disk_*_bps`) are differentials between two
/// counter snapshots.  The first sample after a (re)init has no previous
/// snapshot; the emitter zero-fills its rates.  Consumers never compensate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub net_in_bps: u64,
    pub net_out_bps: u64,
    pub disk_read_bps: u64,
    pub disk_write_bps: u64,
    /// Round-trip latency to the collector host; None when the probe failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ping_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_temp_c: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_temp_c: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gpu_name: Option<String>,
    pub is_vm: bool,
    #[serde(default)]
    pub disks: Vec<DiskSample>,
}

/// One process in the top-N-by-CPU list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: u32,
    pub name: String,
    pub cpu_percent: f32,
    pub ram_percent: f32,
}

// ---------------------------------------------------------------------------
// SystemInfo (once-per-connection / hourly inventory)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterfaceInfo {
    pub name: String,
    pub mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub mount: String,
    pub device: String,
    pub total_bytes: u64,
}

/// Host inventory descriptor.
///
/// Included in the first heartbeat of each connection and at most once per
/// hour afterwards; omitted from all other heartbeats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os_name: String,
    pub os_version: String,
    pub cpu_model: String,
    pub cpu_cores: usize,
    pub ram_total_bytes: u64,
    pub disks: Vec<DiskInfo>,
    pub interfaces: Vec<NetworkInterfaceInfo>,
    /// DMI product name where readable (e.g. "VMware Virtual Platform").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_vendor: Option<String>,
    pub is_vm: bool,
    pub is_container: bool,
}

// ---------------------------------------------------------------------------
// Heartbeat (agent -> collector)
// ---------------------------------------------------------------------------

/// The outbound framing unit: one metric batch plus identity and state.
///
/// Passive mode sends one heartbeat per send interval carrying every sample
/// accumulated since the previous send; Active mode sends one heartbeat per
/// sample.  Replayed heartbeats are identical in shape but carry
/// `historical: true` so the collector can distinguish back-fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub agent_id: String,
    pub hostname: String,
    pub metrics: Vec<MetricSample>,
    /// Always `"online"` -- an agent that can send is online by definition.
    pub status: String,
    pub last_seen_at: DateTime<Utc>,
    pub processes: Vec<ProcessSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_info: Option<SystemInfo>,
    pub auth_token: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub historical: Option<bool>,
}

// ---------------------------------------------------------------------------
// Log types
// ---------------------------------------------------------------------------

/// Log severity.  A total order: `Debug < Info < Warn < Error < Critical`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl Severity {
    /// Parse a severity name, case-insensitive.  Unknown names map to Info.
    pub fn parse_lossy(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Severity::Debug,
            "WARN" | "WARNING" => Severity::Warn,
            "ERROR" | "ERR" => Severity::Error,
            "CRITICAL" | "CRIT" | "FATAL" => Severity::Critical,
            _ => Severity::Info,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// One host log event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    /// Producing source, e.g. `"file:/var/log/syslog"` or `"containers:web"`.
    pub source: String,
    pub message: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Body of `POST /api/agents/{id}/logs` (gzipped on the wire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogBatch {
    pub logs: Vec<LogEvent>,
}

// ---------------------------------------------------------------------------
// Offline buffer envelope
// ---------------------------------------------------------------------------

/// A metric sample as written to the offline buffer.
///
/// Carries enough identity and cached state to rebuild a full heartbeat at
/// replay time without re-collecting anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedMetric {
    pub agent_id: String,
    pub hostname: String,
    pub sample: MetricSample,
    pub top_processes: Vec<ProcessSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_avg: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_ip: Option<String>,
    /// True once the entry has been written to the durable store.
    pub persisted: bool,
}

// ---------------------------------------------------------------------------
// Collector -> agent frames
// ---------------------------------------------------------------------------

/// A server command: `{command, params?, request_id?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub command: String,
    #[serde(default)]
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// A bare token grant: `{auth_token}`.  Persisted, replacing any prior value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokenFrame {
    pub auth_token: String,
}

/// An error envelope: `{error, message?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Error codes the agent reacts to.
pub mod error_codes {
    /// Clears the persisted per-agent token before the next reconnect.
    pub const AUTH_FAILED: &str = "auth_failed";
}

/// All inbound frame shapes.
///
/// Untagged: variants are tried in declaration order, so the most
/// field-constrained shape (command) must come first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    Command(CommandFrame),
    AuthToken(AuthTokenFrame),
    Error(ErrorFrame),
}

// ---------------------------------------------------------------------------
// Command set
// ---------------------------------------------------------------------------

/// The closed set of server command names.
///
/// Unknown names do not parse; callers log and ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandName {
    StartStream,
    StopStream,
    Shutdown,
    Restart,
    Disable,
    AiStatus,
    AiEnable,
    AiDisable,
    AiDownloadModel,
    AiDownloadRunner,
    AiGenerate,
}

impl CommandName {
    pub fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "start_stream" => CommandName::StartStream,
            "stop_stream" => CommandName::StopStream,
            "shutdown" => CommandName::Shutdown,
            "restart" => CommandName::Restart,
            "disable" => CommandName::Disable,
            "ai_status" => CommandName::AiStatus,
            "ai_enable" => CommandName::AiEnable,
            "ai_disable" => CommandName::AiDisable,
            "ai_download_model" => CommandName::AiDownloadModel,
            "ai_download_runner" => CommandName::AiDownloadRunner,
            "ai_generate" => CommandName::AiGenerate,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::StartStream => "start_stream",
            CommandName::StopStream => "stop_stream",
            CommandName::Shutdown => "shutdown",
            CommandName::Restart => "restart",
            CommandName::Disable => "disable",
            CommandName::AiStatus => "ai_status",
            CommandName::AiEnable => "ai_enable",
            CommandName::AiDisable => "ai_disable",
            CommandName::AiDownloadModel => "ai_download_model",
            CommandName::AiDownloadRunner => "ai_download_runner",
            CommandName::AiGenerate => "ai_generate",
        }
    }
}

/// Agent response to a handled command: `{type, agent_id, timestamp, data}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    #[serde(rename = "type")]
    pub reply_type: String,
    pub agent_id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

// ---------------------------------------------------------------------------
// HTTP API types
// ---------------------------------------------------------------------------

/// Body of the one-time `POST /api/register` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub agent_id: String,
    pub hostname: String,
    pub os: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Registration response.  `agent_id` may differ from the requested one;
/// the collector's value is canonical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub agent_id: String,
}

/// Current log-collection settings, polled from
/// `GET /api/agents/{id}/log-settings` every five minutes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSettings {
    pub severity_threshold: Severity,
    #[serde(default)]
    pub troubleshooting: bool,
    /// Extra file paths to tail, in addition to the configured ones.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub retention_days: Option<u32>,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            severity_threshold: Severity::Warn,
            troubleshooting: false,
            sources: Vec::new(),
            retention_days: None,
        }
    }
}

/// Response of `GET /api/agents/updates/check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateInfo {
    pub available: bool,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub url: String,
    /// Hex-encoded SHA-256 of the binary.  Empty from legacy collectors.
    #[serde(default)]
    pub checksum: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
