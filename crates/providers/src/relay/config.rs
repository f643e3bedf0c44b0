use std::time::Duration;

use crate::config::{env_string, env_u64, normalize_base_url, FileConfig};

pub const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:3000";

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub endpoint: String,
    /// Bound on connecting and receiving the relay's response headers.
    pub timeout: Duration,
    /// Longest gap between parsed frames before the turn is abandoned.
    pub stream_idle_timeout: Duration,
    pub proxy: Option<String>,
}

impl ClientConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(30),
            stream_idle_timeout: Duration::from_secs(300),
            proxy: None,
        }
    }

    pub fn from_env_and_file(file: &FileConfig) -> anyhow::Result<Self> {
        let client = file.client.clone().unwrap_or_default();
        let endpoint = env_string("CHAT_RELAY_URL")
            .or(client.endpoint)
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        let mut cfg = Self::new(normalize_base_url(&endpoint)?);
        if let Some(t) = env_u64("TIMEOUT_MS").or(client.timeout_ms) {
            cfg.timeout = Duration::from_millis(t);
        }
        if let Some(idle) = env_u64("STREAM_IDLE_TIMEOUT_MS").or(client.stream_idle_timeout_ms) {
            cfg.stream_idle_timeout = Duration::from_millis(idle);
        }
        cfg.proxy = env_string("HTTPS_PROXY").or_else(|| env_string("HTTP_PROXY"));
        Ok(cfg)
    }
}
