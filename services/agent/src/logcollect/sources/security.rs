//! Security log adapter.
//!
//! Tails the configured security logs and maps native event markers to a
//! `threat_type` metadata field.  A line that parses as a present threat is
//! upgraded to CRITICAL regardless of its native level, so threshold
//! settings can never filter out a detection.

use std::path::PathBuf;

use scribe_protocol::{LogEvent, Severity};
use tokio::sync::{mpsc, watch};

use super::file_tailer::{run_file_tailer, LineMapper};
use super::{event_from_line, guess_severity};

/// Native markers -> threat type.  Covers both syslog-style auth lines and
/// Windows security event codes.
const THREAT_MARKERS: [(&str, &str); 8] = [
    ("Failed password", "auth_failure"),
    ("authentication failure", "auth_failure"),
    ("Invalid user", "invalid_user"),
    ("POSSIBLE BREAK-IN", "breakin_attempt"),
    ("refused connect", "connection_refused"),
    ("4625", "failed_logon"),
    ("4740", "account_lockout"),
    ("4720", "account_created"),
];

/// Classify a raw security-log line.  Returns the threat type when the line
/// parses as threat-present.
pub fn classify(line: &str) -> Option<&'static str> {
    THREAT_MARKERS
        .iter()
        .find(|(marker, _)| line.contains(marker))
        .map(|(_, threat)| *threat)
}

/// Shape a security-log line as an event, upgrading detections to CRITICAL.
pub fn security_event(source: &str, line: &str) -> LogEvent {
    let mut event = event_from_line(source, line);
    if let Some(threat) = classify(line) {
        event.severity = Severity::Critical;
        event
            .metadata
            .insert("threat_type".to_owned(), threat.to_owned());
    } else {
        event.severity = guess_severity(line);
    }
    event
}

/// Tail one security log path through the security mapper.
pub async fn run_security_tailer(
    path: PathBuf,
    tx: mpsc::UnboundedSender<LogEvent>,
    shutdown: watch::Receiver<bool>,
) {
    let source = format!("security:{}", path.display());
    let mapper: LineMapper =
        std::sync::Arc::new(move |line| security_event(&source, line));
    run_file_tailer(path, mapper, tx, shutdown).await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
