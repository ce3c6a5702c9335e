//! Crash survival.
//!
//! Entries are made durable on every `add`, so an abrupt process death (no
//! graceful flush) loses nothing: after restart the full set replays with
//! original timestamps bit-exact and the `historical` flag set.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use scribe_agent::auth::AuthStore;
use scribe_agent::buffer::{BufferStore, OfflineBuffer};
use scribe_agent::collector::HeartbeatTracker;
use scribe_agent::health::HealthState;
use scribe_agent::mode::ModeController;
use scribe_agent::replay::{ReplayGate, Replayer};
use scribe_agent::transport::supervisor::{run_supervisor, ConnectionEffects, SupervisorConfig};
use scribe_agent::transport::{BackoffPolicy, Transport};
use scribe_protocol::{BufferedMetric, MetricSample};
use scribe_test_utils::MockCollector;

fn entry(n: i64) -> BufferedMetric {
    BufferedMetric {
        agent_id: "agent-crash".to_owned(),
        hostname: "host".to_owned(),
        sample: MetricSample {
            timestamp: Utc.timestamp_opt(1_770_000_000 + n, 0).unwrap(),
            cpu_percent: n as f32,
            ram_percent: 10.0,
            net_in_bps: 100,
            net_out_bps: 50,
            disk_read_bps: 0,
            disk_write_bps: 0,
            ping_ms: None,
            cpu_temp_c: None,
            gpu_temp_c: None,
            cpu_name: None,
            gpu_name: None,
            is_vm: false,
            disks: vec![],
        },
        top_processes: vec![],
        load_avg: None,
        public_ip: None,
        persisted: false,
    }
}

fn offline_over(path: &std::path::Path) -> OfflineBuffer {
    let store = BufferStore::open(path).unwrap();
    OfflineBuffer::new(
        1800,
        Duration::from_secs(100 * 365 * 24 * 3600),
        50 * 1024 * 1024,
        Some(store),
    )
}

#[tokio::test]
async fn crashed_agent_replays_full_buffered_set_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("scribe_buffer.db");

    // First life: buffer five samples while the collector is down, then
    // die abruptly (drop without flush).
    let original_timestamps: Vec<_> = {
        let buffer = offline_over(&db);
        for n in 0..5 {
            buffer.add(entry(n));
        }
        buffer
            .load_all()
            .iter()
            .map(|e| e.sample.timestamp)
            .collect()
    };

    // Second life: collector is back.
    let mock = MockCollector::start().await.unwrap();
    let buffer = Arc::new(offline_over(&db));
    assert_eq!(buffer.load_from_disk(), 5, "survivors visible on startup");

    let transport = Transport::new();
    let (mode, _mode_rx) = ModeController::new();
    let gate = ReplayGate::new();
    let (inbound_tx, _inbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let supervisor = tokio::spawn(run_supervisor(
        transport.clone(),
        SupervisorConfig {
            hosts: vec![mock.host()],
            ssl_enabled: false,
            ssl_verify: true,
            agent_id: "agent-crash".to_owned(),
            backoff: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(2)),
        },
        ConnectionEffects {
            tracker: HeartbeatTracker::new(),
            mode,
            replay_gate: gate.clone(),
            health: HealthState::new(),
        },
        inbound_tx,
        shutdown_rx,
    ));

    assert!(mock.wait_for_connections(1, 5000).await);
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while !transport.is_connected() && std::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let replayer = Replayer {
        offline: buffer.clone(),
        transport: transport.clone(),
        auth: Arc::new(AuthStore::new("key".to_owned(), None, None)),
        gate,
        version: "1.0.0".to_owned(),
        connection_address: mock.host(),
    };
    let sent = replayer.drain().await;
    assert_eq!(sent, 5, "full buffered set replayed");

    assert!(mock.wait_for_heartbeats(5, 5000).await);
    let heartbeats = mock.heartbeats().await;
    assert_eq!(heartbeats.len(), 5);
    for (hb, expected_ts) in heartbeats.iter().zip(&original_timestamps) {
        assert_eq!(hb.historical, Some(true));
        assert_eq!(
            hb.metrics[0].timestamp, *expected_ts,
            "original timestamp bit-exact"
        );
        assert_eq!(hb.agent_id, "agent-crash");
    }

    assert_eq!(buffer.pending_count(), 0, "buffer empty after replay");

    let _ = shutdown_tx.send(true);
    supervisor.await.unwrap();
}
