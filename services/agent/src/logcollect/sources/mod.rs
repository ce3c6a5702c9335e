//! Log event sources.
//!
//! Each source is a long-lived task pushing [`LogEvent`]s into the shared
//! ingest channel.  The file tailer is fully generic; the event-log poller,
//! container follower, and security adapter are drivers over small OS
//! contracts so the pipeline is testable without a real host.

pub mod containers;
pub mod event_log;
pub mod file_tailer;
pub mod security;

use chrono::Utc;
use scribe_protocol::{LogEvent, Severity};

/// Best-effort severity extraction from a raw log line.
pub fn guess_severity(line: &str) -> Severity {
    let upper = line.to_uppercase();
    if upper.contains("CRITICAL") || upper.contains("FATAL") || upper.contains("EMERG") {
        Severity::Critical
    } else if upper.contains("ERROR") || upper.contains(" ERR ") {
        Severity::Error
    } else if upper.contains("WARN") {
        Severity::Warn
    } else if upper.contains("DEBUG") || upper.contains("TRACE") {
        Severity::Debug
    } else {
        Severity::Info
    }
}

/// Wrap a raw line as a log event attributed to `source`.
pub fn event_from_line(source: &str, line: &str) -> LogEvent {
    LogEvent {
        timestamp: Utc::now(),
        severity: guess_severity(line),
        source: source.to_owned(),
        message: line.to_owned(),
        metadata: Default::default(),
    }
}
