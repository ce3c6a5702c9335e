//! Server-directed mode switching.
//!
//! `start_stream` flips the agent to Active (one-sample heartbeats at 1 s
//! cadence); `stop_stream` returns it to Passive batching.

use std::time::Duration;

use scribe_agent::agent::Agent;
use scribe_agent::config;
use scribe_probes::mock::MockProbe;
use scribe_test_utils::MockCollector;

#[tokio::test]
async fn start_stream_switches_to_one_second_single_sample_heartbeats() {
    let mock = MockCollector::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut cfg = config::load_config_from_str(
        r#"{"metrics_interval": 1, "reconnect_initial_sec": 1}"#,
    );
    cfg.server_host = mock.host();
    cfg.buffer_data_dir = dir.path().to_path_buf();
    let agent = Agent::with_probe(cfg, Box::new(MockProbe::new()))
        .await
        .unwrap();
    let shutdown = agent.shutdown_handle();
    let handle = tokio::spawn(agent.run());

    assert!(mock.wait_for_connections(1, 5000).await);

    mock.send_command(&serde_json::json!({
        "command": "start_stream",
        "request_id": "req-42",
    }))
    .await;

    // Within a few active ticks, single-sample heartbeats arrive.
    assert!(mock.wait_for_heartbeats(2, 5000).await, "active cadence");
    let active_heartbeats = mock.heartbeats().await;
    for hb in &active_heartbeats {
        assert_eq!(hb.metrics.len(), 1, "active mode sends one sample per heartbeat");
        assert_eq!(hb.historical, None);
    }

    // The command reply echoes the request id.
    let replies = mock.replies().await;
    assert!(replies
        .iter()
        .any(|r| r.reply_type == "start_stream_response"
            && r.request_id.as_deref() == Some("req-42")));

    // Back to passive: the 1 s stream stops.
    mock.send_command(&serde_json::json!({"command": "stop_stream"}))
        .await;
    tokio::time::sleep(Duration::from_millis(1500)).await;
    let count_after_stop = mock.heartbeats().await.len();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(
        mock.heartbeats().await.len(),
        count_after_stop,
        "no more per-second heartbeats after stop_stream"
    );

    let _ = shutdown.send(true);
    handle.await.unwrap();
}
