use crate::http::{is_retryable_status, map_reqwest_err, snippet};
use crate::ollama::config::OllamaConfig;
use async_trait::async_trait;
use futures::StreamExt;
use relay_core::llm::{ByteStream, ChatError, ChatMessage, ChatOpts, ModelClient};
use reqwest::{Client, StatusCode};
use tokio::time::{sleep, timeout, Duration};
use tracing::{error, info, warn};

/// Streaming client for an Ollama-compatible `/api/chat` endpoint.
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    cfg: OllamaConfig,
}

impl OllamaClient {
    pub fn new(cfg: OllamaConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .connect_timeout(cfg.timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.cfg
    }

    /// The options the relay uses for every turn.
    pub fn default_opts(&self) -> ChatOpts {
        ChatOpts {
            model: self.cfg.model.clone(),
        }
    }

    fn map_messages(&self, msgs: &[ChatMessage]) -> Vec<serde_json::Value> {
        msgs.iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect()
    }

    /// Sends the request; the flag on failure tells whether a retry may help.
    async fn open(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, (ChatError, bool)> {
        let send = self.http.post(url).json(body).send();
        let resp = match timeout(self.cfg.timeout, send).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => {
                let e = map_reqwest_err(e);
                let retry = matches!(e, ChatError::Network(_) | ChatError::Timeout(_));
                return Err((e, retry));
            }
            Err(_) => {
                let msg = format!("no response from {} within {:?}", url, self.cfg.timeout);
                return Err((ChatError::Timeout(msg), true));
            }
        };
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target:"providers::ollama","chat stream non-200 status={} body={:?}", status, body);
            return Err((map_status_err(status, body), is_retryable_status(status)));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelClient for OllamaClient {
    async fn stream_chat(&self, msgs: &[ChatMessage], opts: &ChatOpts) -> Result<ByteStream, ChatError> {
        let url = format!("{}/api/chat", self.cfg.base_url.trim_end_matches('/'));
        info!(target:"providers::ollama","start chat stream model={} url={} messages={}", opts.model, url, msgs.len());
        let body = serde_json::json!({
            "model": opts.model,
            "messages": self.map_messages(msgs),
            "stream": true,
        });

        // A cold pod can refuse connections for a while; only failures that
        // happen before any response byte are retried.
        let max_attempts = self.cfg.connect_attempts.max(1);
        let mut attempt = 0u32;
        let resp = loop {
            attempt += 1;
            match self.open(&url, &body).await {
                Ok(r) => break r,
                Err((e, true)) if attempt < max_attempts => {
                    let backoff = Duration::from_millis(300 * attempt as u64);
                    warn!(target:"providers::ollama","attempt {}/{} failed: {}; retrying in {:?}", attempt, max_attempts, e, backoff);
                    sleep(backoff).await;
                }
                Err((e, _)) => return Err(e),
            }
        };
        Ok(Box::pin(resp.bytes_stream().map(|r| r.map_err(map_reqwest_err))))
    }
}

fn map_status_err(status: StatusCode, body: Option<String>) -> ChatError {
    // Ollama reports failures as {"error": "..."}.
    let body = snippet(body);
    let detail = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"].as_str().map(str::to_string))
        .unwrap_or(body);
    ChatError::BackendUnreachable(format!("{} {}", status.as_u16(), detail))
}
