//! OS event-log poller.
//!
//! The OS log store itself is platform-specific and sits behind
//! [`EventLogStore`]; this driver polls it every thirty seconds for entries
//! newer than the last check, with a 24-hour initial look-back so agent
//! downtime does not lose events.

use std::time::Duration;

use chrono::{DateTime, Utc};
use scribe_protocol::LogEvent;
use tokio::sync::{mpsc, watch};
use tracing::debug;

pub const POLL_INTERVAL: Duration = Duration::from_secs(30);
/// How far back the first poll reaches, so agent downtime loses nothing.
const INITIAL_LOOKBACK_HOURS: i64 = 24;

/// Platform adapter contract: return entries strictly newer than `since`.
pub trait EventLogStore: Send {
    fn query_since(&mut self, since: DateTime<Utc>) -> Vec<LogEvent>;
}

pub async fn run_event_log_poller(
    mut store: Box<dyn EventLogStore>,
    tx: mpsc::UnboundedSender<LogEvent>,
    mut shutdown: watch::Receiver<bool>,
    poll_interval: Duration,
) {
    let mut since = Utc::now() - chrono::Duration::hours(INITIAL_LOOKBACK_HOURS);

    loop {
        if *shutdown.borrow() {
            break;
        }
        let checked_at = Utc::now();
        let events = store.query_since(since);
        if !events.is_empty() {
            debug!(count = events.len(), "event-log poll returned entries");
        }
        for event in events {
            if tx.send(event).is_err() {
                return;
            }
        }
        since = checked_at;

        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
