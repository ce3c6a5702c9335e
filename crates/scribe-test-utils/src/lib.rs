// scribe-test-utils: Shared test utilities for the agent suite.
//
// Provides a mock collector: a WebSocket endpoint that records heartbeats
// and injects server commands, and an HTTP API that serves registration,
// log-settings, gzipped log upload, and update-check endpoints.

pub mod mock_collector;
pub mod mock_http;

pub use mock_collector::MockCollector;
pub use mock_http::MockHttpApi;

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_protocol::{LogBatch, LogEvent, Severity, UpdateInfo};

    // -----------------------------------------------------------------------
    // Mock collector (WS) tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn collector_starts_and_reports_port() {
        let collector = MockCollector::start().await.unwrap();
        assert_ne!(collector.local_addr().port(), 0, "should bind a real port");
    }

    #[tokio::test]
    async fn collector_records_heartbeats() {
        use futures_util::SinkExt;
        use tokio_tungstenite::tungstenite::protocol::Message;

        let collector = MockCollector::start().await.unwrap();
        let url = format!("{}/api/ws/agent/test-agent", collector.ws_base());
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        let hb = serde_json::json!({
            "agent_id": "test-agent",
            "hostname": "host",
            "metrics": [],
            "status": "online",
            "last_seen_at": "2026-03-01T00:00:00Z",
            "processes": [],
            "auth_token": "k",
            "version": "1.0.0",
        });
        ws.send(Message::Text(hb.to_string().into())).await.unwrap();

        collector.wait_for_heartbeats(1, 2000).await;
        let seen = collector.heartbeats().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].agent_id, "test-agent");
    }

    #[tokio::test]
    async fn collector_injects_commands() {
        use futures_util::StreamExt;

        let collector = MockCollector::start().await.unwrap();
        let url = format!("{}/api/ws/agent/test-agent", collector.ws_base());
        let (mut ws, _) = tokio_tungstenite::connect_async(&url).await.unwrap();

        collector.wait_for_connections(1, 2000).await;
        assert!(
            collector
                .send_command(&serde_json::json!({"command": "start_stream"}))
                .await
        );

        let msg = tokio::time::timeout(std::time::Duration::from_secs(2), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = msg.into_text().unwrap();
        assert!(text.contains("start_stream"));
    }

    // -----------------------------------------------------------------------
    // Mock HTTP API tests
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn http_api_serves_update_info_and_binary() {
        let api = MockHttpApi::start().await.unwrap();
        api.set_update(
            UpdateInfo {
                available: true,
                version: "9.9.9".to_owned(),
                url: format!("{}/download/agent", api.base_url()),
                checksum: String::new(),
            },
            b"new-binary".to_vec(),
        )
        .await;

        let info: UpdateInfo = reqwest_get_json(&format!(
            "{}/api/agents/updates/check?current_version=1.0.0&platform=linux&arch=x86_64",
            api.base_url()
        ))
        .await;
        assert!(info.available);
        assert_eq!(info.version, "9.9.9");
    }

    #[tokio::test]
    async fn http_api_accepts_gzipped_log_batch() {
        use flate2::write::GzEncoder;
        use std::io::Write;

        let api = MockHttpApi::start().await.unwrap();
        let batch = LogBatch {
            logs: vec![LogEvent {
                timestamp: "2026-03-01T00:00:00Z".parse().unwrap(),
                severity: Severity::Error,
                source: "test".to_owned(),
                message: "disk failing".to_owned(),
                metadata: Default::default(),
            }],
        };
        let json = serde_json::to_vec(&batch).unwrap();
        let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(&json).unwrap();
        let gz = enc.finish().unwrap();

        let client = tokio::net::TcpStream::connect(api.local_addr()).await;
        assert!(client.is_ok());

        let resp = http_post_gzip(
            &format!("{}/api/agents/agent-1/logs", api.base_url()),
            gz,
        )
        .await;
        assert!(resp);

        let batches = api.log_batches().await;
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].logs[0].message, "disk failing");
    }

    // Minimal HTTP helpers so the crate itself stays reqwest-free.

    async fn reqwest_get_json<T: serde::de::DeserializeOwned>(url: &str) -> T {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (host, path) = split_url(url);
        let mut stream = tokio::net::TcpStream::connect(&host).await.unwrap();
        let req = format!("GET {path} HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8(buf).unwrap();
        let body = text.split("\r\n\r\n").nth(1).unwrap();
        serde_json::from_str(body).unwrap()
    }

    async fn http_post_gzip(url: &str, body: Vec<u8>) -> bool {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (host, path) = split_url(url);
        let mut stream = tokio::net::TcpStream::connect(&host).await.unwrap();
        let head = format!(
            "POST {path} HTTP/1.1\r\nHost: {host}\r\nContent-Encoding: gzip\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        stream.write_all(head.as_bytes()).await.unwrap();
        stream.write_all(&body).await.unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        String::from_utf8_lossy(&buf).contains("200")
    }

    fn split_url(url: &str) -> (String, String) {
        let rest = url.strip_prefix("http://").unwrap();
        let (host, path) = rest.split_once('/').unwrap();
        (host.to_owned(), format!("/{path}"))
    }
}
