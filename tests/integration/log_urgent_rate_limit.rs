//! Urgent-flush rate limiting.
//!
//! The first ten urgent (>= ERROR) events of a window flush immediately;
//! the rest wait for the periodic flush.  A fresh window grants urgent
//! flushes again.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scribe_agent::http::ApiClient;
use scribe_agent::logcollect::batcher::{run_flusher, LogBatcher, LogShipper};
use scribe_protocol::{LogEvent, Severity};
use scribe_test_utils::MockHttpApi;

fn error_event(n: usize) -> LogEvent {
    LogEvent {
        timestamp: Utc::now(),
        severity: Severity::Error,
        source: "test".to_owned(),
        message: format!("error-{n}"),
        metadata: Default::default(),
    }
}

async fn delivered_count(api: &MockHttpApi) -> usize {
    api.log_batches()
        .await
        .iter()
        .map(|b| b.logs.len())
        .sum()
}

#[tokio::test]
async fn urgent_flushes_cap_at_ten_per_window() {
    let api_server = MockHttpApi::start().await.unwrap();
    let api = Arc::new(ApiClient::new(api_server.base_url(), "k".to_owned(), true));

    let (batcher, flush_rx) = LogBatcher::new(50);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let periodic = Duration::from_secs(2);
    let flusher = tokio::spawn(run_flusher(
        batcher.clone(),
        LogShipper {
            api,
            agent_id: "agent-logs".to_owned(),
        },
        periodic,
        flush_rx,
        shutdown_rx,
    ));

    // First ten urgent events: delivered promptly via urgent flushes.
    for n in 0..10 {
        batcher.push(error_event(n));
    }
    let deadline = std::time::Instant::now() + Duration::from_millis(1500);
    while delivered_count(&api_server).await < 10 {
        assert!(
            std::time::Instant::now() < deadline,
            "first ten urgent events must flush immediately"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    // Events 11-20: budget spent, nothing urgent happens.
    for n in 10..20 {
        batcher.push(error_event(n));
    }
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        delivered_count(&api_server).await,
        10,
        "over-budget urgent triggers are coalesced"
    );

    // The periodic flush picks them up.
    let deadline = std::time::Instant::now() + Duration::from_secs(4);
    while delivered_count(&api_server).await < 20 {
        assert!(
            std::time::Instant::now() < deadline,
            "periodic flush delivers the coalesced tail"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // A new window restores urgent behavior (the minute boundary).
    batcher.reset_urgent_window();
    batcher.push(error_event(99));
    let deadline = std::time::Instant::now() + Duration::from_millis(1500);
    while delivered_count(&api_server).await < 21 {
        assert!(
            std::time::Instant::now() < deadline,
            "fresh window grants urgent flushes again"
        );
        tokio::time::sleep(Duration::from_millis(25)).await;
    }

    let _ = shutdown_tx.send(true);
    flusher.await.unwrap();
}

#[tokio::test]
async fn below_threshold_events_never_reach_the_wire() {
    use scribe_agent::logcollect::gatekeeper::Gatekeeper;

    let gate = Gatekeeper::new(Severity::Warn);
    let info = LogEvent {
        timestamp: Utc::now(),
        severity: Severity::Info,
        source: "syslog".to_owned(),
        message: "routine".to_owned(),
        metadata: Default::default(),
    };
    assert!(!gate.accept(&info), "below-threshold event is filtered");
    let warn = LogEvent {
        severity: Severity::Warn,
        ..info
    };
    assert!(gate.accept(&warn));
}
