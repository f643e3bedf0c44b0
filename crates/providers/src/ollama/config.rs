use std::time::Duration;

use crate::config::{env_string, env_u64, normalize_base_url, FileConfig};

pub const DEFAULT_MODEL: &str = "qwen3:8b";

#[derive(Clone, Debug)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    /// Bound on connecting and receiving response headers; the body itself
    /// is only bounded by the relay's idle timeout.
    pub timeout: Duration,
    pub connect_attempts: u32,
    pub proxy: Option<String>,
}

impl OllamaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(30),
            connect_attempts: 3,
            proxy: None,
        }
    }

    pub fn from_env_and_file(file: &FileConfig) -> anyhow::Result<Self> {
        let backend = file.backend.clone().unwrap_or_default();
        let raw_url = env_string("OLLAMA_URL")
            .or(backend.url)
            .ok_or_else(|| anyhow::anyhow!("OLLAMA_URL not set"))?;
        let mut cfg = Self::new(normalize_base_url(&raw_url)?);
        if let Some(m) = env_string("OLLAMA_MODEL").or(backend.model) {
            cfg.model = m;
        }
        if let Some(t) = env_u64("TIMEOUT_MS").or(backend.timeout_ms) {
            cfg.timeout = Duration::from_millis(t);
        }
        if let Some(a) = env_u64("BACKEND_CONNECT_ATTEMPTS")
            .map(|a| a as u32)
            .or(backend.connect_attempts)
        {
            cfg.connect_attempts = a.max(1);
        }
        cfg.proxy = env_string("HTTPS_PROXY").or_else(|| env_string("HTTP_PROXY"));
        Ok(cfg)
    }
}
