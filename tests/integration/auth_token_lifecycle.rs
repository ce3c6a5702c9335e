//! Auth token lifecycle over the wire.
//!
//! A bare `{auth_token}` frame is persisted into the config file; an
//! `auth_failed` error frame clears it again.

use std::time::Duration;

use scribe_agent::agent::Agent;
use scribe_agent::config;
use scribe_probes::mock::MockProbe;
use scribe_test_utils::MockCollector;

async fn wait_for_token(
    path: &std::path::Path,
    expected: Option<&str>,
    timeout: Duration,
) -> bool {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        let current = config::load_config(path).auth_token;
        if current.as_deref() == expected {
            return true;
        }
        if std::time::Instant::now() > deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn token_grant_persists_and_auth_failed_clears() {
    let mock = MockCollector::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("config.json");
    std::fs::write(
        &config_path,
        r#"{"metrics_interval": 1, "reconnect_initial_sec": 1}"#,
    )
    .unwrap();

    let mut cfg = config::load_config(&config_path);
    cfg.server_host = mock.host();
    cfg.buffer_data_dir = dir.path().join("data");
    let agent = Agent::with_probe(cfg, Box::new(MockProbe::new()))
        .await
        .unwrap();
    let shutdown = agent.shutdown_handle();
    let handle = tokio::spawn(agent.run());

    assert!(mock.wait_for_connections(1, 5000).await);
    mock.wait_for_heartbeats(0, 200).await;

    // Server issues a per-agent token.
    assert!(
        mock.send_command(&serde_json::json!({"auth_token": "tok-issued-1"}))
            .await
    );
    assert!(
        wait_for_token(&config_path, Some("tok-issued-1"), Duration::from_secs(5)).await,
        "token grant persisted to config"
    );

    // Authentication failure clears it.
    assert!(
        mock.send_command(
            &serde_json::json!({"error": "auth_failed", "message": "token rejected"})
        )
        .await
    );
    assert!(
        wait_for_token(&config_path, None, Duration::from_secs(5)).await,
        "auth_failed clears the persisted token"
    );

    let _ = shutdown.send(true);
    handle.await.unwrap();
}
