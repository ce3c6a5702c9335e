//! Steady passive operation against a live mock collector.
//!
//! The first heartbeat of a connection carries the accumulated samples and
//! the SystemInfo descriptor; the following heartbeat repeats neither.

use std::sync::Arc;
use std::time::Duration;

use scribe_agent::agent::Agent;
use scribe_agent::collector::{self, Collector};
use scribe_agent::config;
use scribe_probes::mock::MockProbe;
use scribe_test_utils::MockCollector;

async fn start_agent(
    server_host: &str,
    data_dir: &std::path::Path,
) -> (
    tokio::sync::watch::Sender<bool>,
    Arc<Collector>,
    tokio::task::JoinHandle<()>,
) {
    let mut cfg = config::load_config_from_str(
        r#"{"metrics_interval": 1, "reconnect_initial_sec": 1}"#,
    );
    cfg.server_host = server_host.to_owned();
    cfg.buffer_data_dir = data_dir.to_path_buf();
    let agent = Agent::with_probe(cfg, Box::new(MockProbe::new()))
        .await
        .unwrap();
    let shutdown = agent.shutdown_handle();
    let collector = agent.collector();
    let handle = tokio::spawn(agent.run());
    (shutdown, collector, handle)
}

#[tokio::test]
async fn passive_heartbeat_batches_samples_with_system_info_once() {
    let mock = MockCollector::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let (shutdown, collector, handle) = start_agent(&mock.host(), dir.path()).await;

    assert!(mock.wait_for_connections(1, 5000).await, "agent connects");

    // Let a few passive samples accumulate (collect interval 1 s).
    tokio::time::sleep(Duration::from_millis(2600)).await;
    assert!(collector::passive_send_once(&collector).await);
    assert!(mock.wait_for_heartbeats(1, 2000).await);

    let first = mock.heartbeats().await[0].clone();
    assert!(
        first.metrics.len() >= 2,
        "accumulated batch, got {}",
        first.metrics.len()
    );
    assert!(first.system_info.is_some(), "first heartbeat carries SystemInfo");
    assert_eq!(first.historical, None);
    assert_eq!(first.status, "online");
    assert!(!first.processes.is_empty(), "top processes populated");

    // More samples, second send: no SystemInfo this time.
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert!(collector::passive_send_once(&collector).await);
    assert!(mock.wait_for_heartbeats(2, 2000).await);
    let second = mock.heartbeats().await[1].clone();
    assert!(second.system_info.is_none(), "SystemInfo not repeated");

    let _ = shutdown.send(true);
    handle.await.unwrap();
}

#[tokio::test]
async fn heartbeats_arrive_in_send_order() {
    let mock = MockCollector::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let (shutdown, collector, handle) = start_agent(&mock.host(), dir.path()).await;
    assert!(mock.wait_for_connections(1, 5000).await);

    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(1100)).await;
        collector::passive_send_once(&collector).await;
    }
    assert!(mock.wait_for_heartbeats(2, 3000).await);

    let heartbeats = mock.heartbeats().await;
    for pair in heartbeats.windows(2) {
        assert!(
            pair[0].last_seen_at <= pair[1].last_seen_at,
            "delivery order equals send order"
        );
    }

    let _ = shutdown.send(true);
    handle.await.unwrap();
}
