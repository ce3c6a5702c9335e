//! Disconnect, buffer offline, reconnect, replay.
//!
//! While the collector is down, samples land in the offline buffer.  On
//! reconnect the buffered window arrives as `historical=true` heartbeats in
//! chronological order, and the buffer drains to zero.

use std::time::Duration;

use scribe_agent::agent::Agent;
use scribe_agent::config;
use scribe_probes::mock::MockProbe;
use scribe_test_utils::MockCollector;

#[tokio::test]
async fn outage_window_is_replayed_in_order_after_reconnect() {
    let mock = MockCollector::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut cfg = config::load_config_from_str(
        r#"{"metrics_interval": 1, "reconnect_initial_sec": 1, "reconnect_max_sec": 2}"#,
    );
    cfg.server_host = mock.host();
    cfg.buffer_data_dir = dir.path().to_path_buf();
    let agent = Agent::with_probe(cfg, Box::new(MockProbe::new()))
        .await
        .unwrap();
    let shutdown = agent.shutdown_handle();
    let offline = agent.offline();
    let transport = agent.transport();
    let handle = tokio::spawn(agent.run());

    assert!(mock.wait_for_connections(1, 5000).await);

    // Kill the connection and refuse re-dials.
    mock.set_accepting(false);
    mock.disconnect().await;

    // Wait until the agent notices, then let it buffer a few samples.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while transport.is_connected() && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!transport.is_connected(), "agent noticed the outage");

    let buffer_deadline = std::time::Instant::now() + Duration::from_secs(10);
    while offline.mem_len() < 3 && std::time::Instant::now() < buffer_deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    let buffered = offline.mem_len();
    assert!(buffered >= 3, "offline buffer accumulated, got {buffered}");

    // Collector returns; replay must cover the outage window.
    mock.set_accepting(true);
    assert!(mock.wait_for_connections(2, 15000).await, "agent reconnects");

    let replay_deadline = std::time::Instant::now() + Duration::from_secs(15);
    loop {
        let historical: Vec<_> = mock
            .heartbeats()
            .await
            .into_iter()
            .filter(|hb| hb.historical == Some(true))
            .collect();
        if historical.len() >= buffered {
            // Chronological order by original sample timestamp.
            for pair in historical.windows(2) {
                assert!(
                    pair[0].metrics[0].timestamp <= pair[1].metrics[0].timestamp,
                    "replay is chronological"
                );
            }
            break;
        }
        assert!(
            std::time::Instant::now() < replay_deadline,
            "replay incomplete: {} of {buffered}",
            historical.len()
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // Memory count drops to zero after successful replay.
    let drain_deadline = std::time::Instant::now() + Duration::from_secs(5);
    while offline.mem_len() > 0 && std::time::Instant::now() < drain_deadline {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(offline.mem_len(), 0, "offline buffer drained");

    let _ = shutdown.send(true);
    handle.await.unwrap();
}
