//! Generic log file tailer.
//!
//! Follows a file from its current end (catch-up-from-end: history before
//! the agent started is not re-ingested), detects truncation/rotation by a
//! shrinking file and re-opens from the start, and waits patiently for a
//! file that does not exist yet.

use std::path::PathBuf;
use std::time::Duration;

use scribe_protocol::LogEvent;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

pub const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MISSING_FILE_RETRY: Duration = Duration::from_secs(5);

/// Maps a raw line to an event; the security adapter swaps in its own.
pub type LineMapper = std::sync::Arc<dyn Fn(&str) -> LogEvent + Send + Sync>;

pub async fn run_file_tailer(
    path: PathBuf,
    mapper: LineMapper,
    tx: mpsc::UnboundedSender<LogEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut position: u64 = match tokio::fs::metadata(&path).await {
        // Catch up from the end: existing content is history.
        Ok(meta) => meta.len(),
        Err(_) => 0,
    };

    loop {
        if *shutdown.borrow() {
            break;
        }

        let meta = match tokio::fs::metadata(&path).await {
            Ok(meta) => meta,
            Err(_) => {
                debug!(path = %path.display(), "log file missing, waiting");
                position = 0;
                if sleep_or_shutdown(MISSING_FILE_RETRY, &mut shutdown).await {
                    break;
                }
                continue;
            }
        };

        if meta.len() < position {
            // Truncated or rotated in place: start over.
            debug!(path = %path.display(), "log file shrank, re-reading from start");
            position = 0;
        }

        if meta.len() > position {
            position = read_from(&path, position, &mapper, &tx).await;
        }

        if sleep_or_shutdown(POLL_INTERVAL, &mut shutdown).await {
            break;
        }
    }
}

/// Read new complete lines starting at `position`; returns the new offset.
async fn read_from(
    path: &PathBuf,
    position: u64,
    mapper: &LineMapper,
    tx: &mpsc::UnboundedSender<LogEvent>,
) -> u64 {
    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "log file open failed");
            return position;
        }
    };
    let mut reader = BufReader::new(file);
    if reader.seek(SeekFrom::Start(position)).await.is_err() {
        return position;
    }

    let mut offset = position;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(n) => {
                offset += n as u64;
                let trimmed = line.trim_end_matches(['\n', '\r']);
                if !trimmed.is_empty() {
                    let _ = tx.send(mapper(trimmed));
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "log file read failed");
                break;
            }
        }
    }
    offset
}

async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.changed() => *shutdown.borrow(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
