//! Authentication token store.
//!
//! Heartbeats carry the server-issued per-agent token when one exists,
//! otherwise the tenant API key.  Token grants and `auth_failed` clears are
//! persisted straight back into the config file so they survive restarts.

use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{info, warn};

use crate::config;

pub struct AuthStore {
    api_key: String,
    token: Mutex<Option<String>>,
    config_path: Option<PathBuf>,
}

impl AuthStore {
    pub fn new(api_key: String, token: Option<String>, config_path: Option<PathBuf>) -> Self {
        AuthStore {
            api_key,
            token: Mutex::new(token),
            config_path,
        }
    }

    /// The token heartbeats should carry right now.
    pub fn current(&self) -> String {
        self.token
            .lock()
            .ok()
            .and_then(|t| t.clone())
            .unwrap_or_else(|| self.api_key.clone())
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    /// Store a server-issued token and persist it.
    pub fn set_token(&self, token: String) {
        info!("per-agent auth token received");
        if let Ok(mut guard) = self.token.lock() {
            *guard = Some(token.clone());
        }
        self.persist(Some(&token));
    }

    /// Drop the per-agent token (auth_failed); heartbeats fall back to the
    /// API key on the next connection.
    pub fn clear_token(&self) {
        warn!("clearing per-agent auth token");
        if let Ok(mut guard) = self.token.lock() {
            *guard = None;
        }
        self.persist(None);
    }

    fn persist(&self, token: Option<&str>) {
        let Some(path) = &self.config_path else {
            return;
        };
        if let Err(e) = config::persist_auth_token(path, token) {
            warn!(path = %path.display(), error = %e, "failed to persist auth token");
        }
    }
}
