//! Periodic log-settings refresh.
//!
//! Every five minutes the agent pulls the collector's current log settings
//! (threshold, troubleshooting flag, extra sources) and applies them
//! atomically.  New file sources are reported so the pipeline can attach
//! tailers; a fetch failure keeps the previous settings.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::debug;

use crate::http::ApiClient;
use crate::logcollect::gatekeeper::Gatekeeper;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

pub async fn run_settings_refresh(
    api: Arc<ApiClient>,
    agent_id: String,
    gatekeeper: Arc<Gatekeeper>,
    new_source_tx: mpsc::UnboundedSender<PathBuf>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut known_sources: HashSet<String> = HashSet::new();

    loop {
        if *shutdown.borrow() {
            break;
        }
        match api.log_settings(&agent_id).await {
            Ok(settings) => {
                gatekeeper.apply(&settings);
                for source in &settings.sources {
                    if known_sources.insert(source.clone()) {
                        debug!(source = %source, "server-directed log source added");
                        let _ = new_source_tx.send(PathBuf::from(source));
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "log-settings refresh failed, keeping previous");
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_protocol::{LogSettings, Severity};

    #[tokio::test]
    async fn refresh_applies_settings_and_reports_new_sources() {
        let api_server = scribe_test_utils::MockHttpApi::start().await.unwrap();
        api_server
            .set_log_settings(LogSettings {
                severity_threshold: Severity::Debug,
                troubleshooting: false,
                sources: vec!["/var/log/extra.log".to_owned()],
                retention_days: Some(7),
            })
            .await;

        let api = Arc::new(ApiClient::new(api_server.base_url(), "k".to_owned(), true));
        let gate = Arc::new(Gatekeeper::new(Severity::Warn));
        let (src_tx, mut src_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(run_settings_refresh(
            api,
            "agent-1".to_owned(),
            gate.clone(),
            src_tx,
            shutdown_rx,
            Duration::from_millis(50),
        ));

        let new_source = tokio::time::timeout(Duration::from_secs(5), src_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(new_source, PathBuf::from("/var/log/extra.log"));
        assert_eq!(gate.threshold(), Severity::Debug);

        // A second cycle does not re-announce the same source.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(src_rx.try_recv().is_err());

        let _ = shutdown_tx.send(true);
        handle.await.unwrap();
    }
}
