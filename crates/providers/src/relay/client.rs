use std::sync::Arc;
use std::time::Instant;

use crate::http::{map_reqwest_err, snippet};
use crate::relay::config::ClientConfig;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use relay_core::llm::{ChatError, ChatMessage};
use relay_core::wire::{DropObserver, Frame, FrameDecoder, FrameStream};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, error, info, warn};

const IDLE_POLL: Duration = Duration::from_millis(500);

/// Client side of the relay: sends a conversation to `POST /chat` and
/// rebuilds the assistant reply from the streamed frames.
#[derive(Clone)]
pub struct RelayClient {
    http: Client,
    cfg: ClientConfig,
    observer: Option<Arc<dyn DropObserver>>,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

impl RelayClient {
    pub fn new(cfg: ClientConfig) -> anyhow::Result<Self> {
        let mut builder = Client::builder()
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(cfg.timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self {
            http,
            cfg,
            observer: None,
        })
    }

    pub fn with_drop_observer(mut self, observer: Arc<dyn DropObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.cfg.endpoint.trim_end_matches('/'), route)
    }

    /// Streams one turn. `on_update` receives the whole reply so far after
    /// every chunk that adds text, in arrival order, and is never called
    /// after this returns.
    pub async fn stream_turn<F>(&self, messages: &[ChatMessage], on_update: F) -> Result<String, ChatError>
    where
        F: FnMut(&str),
    {
        let url = self.url("/chat");
        info!(target:"providers::relay","start turn url={} messages={}", url, messages.len());
        let send = self
            .http
            .post(&url)
            .json(&serde_json::json!({ "messages": messages }))
            .send();
        let resp = timeout(self.cfg.timeout, send)
            .await
            .map_err(|_| ChatError::Timeout(format!("no response from {} within {:?}", url, self.cfg.timeout)))?
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target:"providers::relay","turn rejected status={} body={:?}", status, body);
            return Err(map_status_err(status, body));
        }
        let decoder = match &self.observer {
            Some(obs) => FrameDecoder::with_observer(obs.clone()),
            None => FrameDecoder::new(),
        };
        let bytes = resp.bytes_stream().map(|r| r.map_err(map_reqwest_err));
        let res = reconstruct_with(bytes, decoder, self.cfg.stream_idle_timeout, on_update).await;
        match &res {
            Ok(reply) => info!(target:"providers::relay","turn complete reply_len={}", reply.len()),
            Err(e) => warn!(target:"providers::relay","turn failed: {}", e),
        }
        res
    }

    /// Asks the relay to start or stop the backend's pod.
    pub async fn toggle_pod(&self, start: bool) -> Result<serde_json::Value, ChatError> {
        let url = self.url(if start { "/pod/start" } else { "/pod/stop" });
        info!(target:"providers::relay","pod toggle start={} url={}", start, url);
        let resp = timeout(self.cfg.timeout, self.http.post(&url).send())
            .await
            .map_err(|_| ChatError::Timeout(format!("no response from {}", url)))?
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            return Err(map_status_err(status, body));
        }
        resp.json().await.map_err(|e| ChatError::Decode(e.to_string()))
    }
}

/// Rebuilds a reply from raw relay bytes.
///
/// Returns the reply on `[STREAM_END]`. `[STREAM_ERROR]` and a source that
/// closes without a terminal frame fail with the partial text attached.
pub async fn reconstruct<S, F>(bytes: S, idle: Duration, on_update: F) -> Result<String, ChatError>
where
    S: Stream<Item = Result<Bytes, ChatError>>,
    F: FnMut(&str),
{
    reconstruct_with(bytes, FrameDecoder::new(), idle, on_update).await
}

async fn reconstruct_with<S, F>(
    bytes: S,
    decoder: FrameDecoder,
    idle: Duration,
    mut on_update: F,
) -> Result<String, ChatError>
where
    S: Stream<Item = Result<Bytes, ChatError>>,
    F: FnMut(&str),
{
    let mut frames = Box::pin(FrameStream::with_decoder(bytes, decoder));
    let mut reply = String::new();
    let mut last = Instant::now();
    let outcome = loop {
        tokio::select! {
            item = frames.next() => {
                last = Instant::now();
                match item {
                    Some(Ok(Frame::Chunk(c))) => {
                        if !c.delta_content.is_empty() {
                            reply.push_str(&c.delta_content);
                            on_update(&reply);
                        }
                    }
                    Some(Ok(Frame::End)) => break Ok(()),
                    Some(Ok(Frame::Error)) => break Err(ChatError::MidStreamFailure { partial: String::new() }),
                    Some(Err(e)) => break Err(e),
                    None => break Err(ChatError::AbnormalTermination { partial: String::new() }),
                }
            }
            _ = sleep(IDLE_POLL) => {
                if last.elapsed() > idle {
                    break Err(ChatError::Timeout(format!("no frame for {:?}", idle)));
                }
            }
        }
    };
    let stats = frames.stats();
    debug!(target:"providers::relay","frames chunks={} dropped={}", stats.chunks, stats.dropped());
    match outcome {
        Ok(()) => Ok(reply),
        Err(e) => Err(e.with_partial(&reply)),
    }
}

fn map_status_err(status: StatusCode, body: Option<String>) -> ChatError {
    let body = snippet(body);
    let msg = match serde_json::from_str::<ErrorBody>(&body) {
        Ok(b) => match b.details {
            Some(d) => format!("{}: {}", b.error, d),
            None => b.error,
        },
        Err(_) => format!("{} {}", status.as_u16(), body),
    };
    if status.is_client_error() {
        ChatError::BadRequest(msg)
    } else if status.is_server_error() {
        ChatError::BackendUnreachable(msg)
    } else {
        ChatError::Other(msg)
    }
}
