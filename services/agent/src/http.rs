//! Collector HTTP API client: registration, log settings, and gzipped log
//! upload.  Every request carries an explicit timeout; failures are typed
//! and never fatal.

use std::io::Write;
use std::time::Duration;

use flate2::write::GzEncoder;
use scribe_protocol::{LogBatch, LogSettings, RegisterRequest, RegisterResponse};
use tracing::debug;

pub const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
pub const LOG_POST_TIMEOUT: Duration = Duration::from_secs(30);
pub const SETTINGS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("server returned {0}")]
    Status(u16),
    #[error("encode error: {0}")]
    Encode(String),
}

pub struct ApiClient {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: String, api_key: String, ssl_verify: bool) -> Self {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(!ssl_verify)
            .build()
            .unwrap_or_default();
        ApiClient {
            base_url,
            api_key,
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// One-time registration.  The response's `agent_id` is canonical and
    /// may differ from the requested one.
    pub async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, ApiError> {
        let response = self
            .client
            .post(format!("{}/api/register", self.base_url))
            .header("X-API-Key", &self.api_key)
            .json(req)
            .timeout(REGISTER_TIMEOUT)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status().as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))
    }

    /// Current log-collection settings.
    pub async fn log_settings(&self, agent_id: &str) -> Result<LogSettings, ApiError> {
        let response = self
            .client
            .get(format!(
                "{}/api/agents/{}/log-settings",
                self.base_url, agent_id
            ))
            .header("X-API-Key", &self.api_key)
            .timeout(SETTINGS_TIMEOUT)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status().as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))
    }

    /// Upload one log batch: JSON, gzipped, `Content-Encoding: gzip`.
    pub async fn post_logs(&self, agent_id: &str, batch: &LogBatch) -> Result<(), ApiError> {
        let body = gzip_json(batch)?;
        debug!(
            events = batch.logs.len(),
            bytes = body.len(),
            "uploading log batch"
        );
        let response = self
            .client
            .post(format!("{}/api/agents/{}/logs", self.base_url, agent_id))
            .header("X-API-Key", &self.api_key)
            .header("Content-Encoding", "gzip")
            .header("Content-Type", "application/json")
            .body(body)
            .timeout(LOG_POST_TIMEOUT)
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ApiError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

fn gzip_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, ApiError> {
    let json = serde_json::to_vec(value).map_err(|e| ApiError::Encode(e.to_string()))?;
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(&json)
        .map_err(|e| ApiError::Encode(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| ApiError::Encode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use scribe_protocol::{LogEvent, Severity};

    #[test]
    fn gzip_round_trips() {
        use std::io::Read;
        let batch = LogBatch {
            logs: vec![LogEvent {
                timestamp: "2026-03-01T00:00:00Z".parse().unwrap(),
                severity: Severity::Warn,
                source: "test".to_owned(),
                message: "hello".to_owned(),
                metadata: Default::default(),
            }],
        };
        let gz = gzip_json(&batch).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(&gz[..]);
        let mut json = String::new();
        decoder.read_to_string(&mut json).unwrap();
        let back: LogBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back, batch);
    }

    #[tokio::test]
    async fn register_roundtrip_against_mock() {
        let api = scribe_test_utils::MockHttpApi::start().await.unwrap();
        let client = ApiClient::new(api.base_url(), "key".to_owned(), true);
        let resp = client
            .register(&RegisterRequest {
                agent_id: "host-aa".to_owned(),
                hostname: "host".to_owned(),
                os: "linux".to_owned(),
                tenant_id: None,
            })
            .await
            .unwrap();
        assert_eq!(resp.agent_id, "host-aa");
        assert_eq!(api.registered().await.len(), 1);
    }

    #[tokio::test]
    async fn post_logs_lands_in_mock() {
        let api = scribe_test_utils::MockHttpApi::start().await.unwrap();
        let client = ApiClient::new(api.base_url(), "key".to_owned(), true);
        let batch = LogBatch {
            logs: vec![LogEvent {
                timestamp: "2026-03-01T00:00:00Z".parse().unwrap(),
                severity: Severity::Error,
                source: "file:/var/log/syslog".to_owned(),
                message: "boom".to_owned(),
                metadata: Default::default(),
            }],
        };
        client.post_logs("agent-1", &batch).await.unwrap();
        let seen = api.log_batches().await;
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].logs[0].message, "boom");
    }
}
