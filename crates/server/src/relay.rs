//! `POST /chat`: forwards one turn to the backend and relays its bytes.
//!
//! Everything that can go wrong before the first backend byte is known
//! becomes an ordinary JSON error response. Once the stream response is
//! returned its status is committed, so later failures are reported only
//! in-band with `[STREAM_ERROR]`.

use std::convert::Infallible;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use relay_core::llm::{ByteStream, ChatMessage};
use relay_core::wire::{FrameDecoder, STREAM_END_MARKER, STREAM_ERROR_MARKER};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tracing::{error, info, warn};

use crate::{error::ApiError, AppState};

/// Bounded so a slow client throttles backend reads instead of buffering.
pub const RELAY_CHANNEL_CAPACITY: usize = 16;
const IDLE_POLL: Duration = Duration::from_millis(500);
const MESSAGES_REQUIRED: &str = "Request body must include a 'messages' array";

pub async fn chat(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let messages = parse_turn(&body)?;
    info!(target: "relay::chat", "turn accepted messages={} model={}", messages.len(), state.opts.model);

    if state.ensure_pod_on_turn {
        if let Some(pods) = &state.pods {
            if let Err(e) = pods.ensure_running().await {
                warn!(target: "relay::chat", "pod resume failed, trying backend anyway: {}", e);
            }
        }
    }

    let mut upstream = state
        .backend
        .stream_chat(&messages, &state.opts)
        .await
        .map_err(|e| {
            error!(target: "relay::chat", "error contacting backend: {}", e);
            ApiError::backend_unreachable(e.to_string())
        })?;

    let idle = state.stream_idle_timeout;
    let first = match timeout(idle, upstream.next()).await {
        Ok(Some(Ok(bytes))) => bytes,
        Ok(Some(Err(e))) => {
            error!(target: "relay::chat", "backend failed before first byte: {}", e);
            return Err(ApiError::backend_unreachable(e.to_string()));
        }
        Ok(None) => {
            error!(target: "relay::chat", "backend returned an empty body");
            return Err(ApiError::backend_unreachable("backend returned an empty body"));
        }
        Err(_) => {
            error!(target: "relay::chat", "no backend bytes within {:?}", idle);
            return Err(ApiError::backend_unreachable(format!(
                "no response bytes within {:?}",
                idle
            )));
        }
    };

    let (tx, rx) = mpsc::channel::<Bytes>(RELAY_CHANNEL_CAPACITY);
    tokio::spawn(pump(first, upstream, tx, idle));
    Ok(stream_response(rx))
}

/// Validates a turn body without touching the backend.
pub fn parse_turn(body: &[u8]) -> Result<Vec<ChatMessage>, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("Request body must be JSON: {}", e)))?;
    let raw = match value.get("messages") {
        Some(raw) if raw.is_array() => raw,
        _ => return Err(ApiError::BadRequest(MESSAGES_REQUIRED.to_string())),
    };
    let messages = Vec::<ChatMessage>::deserialize(raw)
        .map_err(|e| ApiError::BadRequest(format!("Invalid message in 'messages': {}", e)))?;
    if messages.is_empty() {
        return Err(ApiError::BadRequest("'messages' must not be empty".to_string()));
    }
    Ok(messages)
}

enum Outcome {
    Completed,
    Failed,
    ClientGone,
}

/// Copies backend bytes to the response channel verbatim, then appends
/// exactly one terminal marker unless the client has gone away.
async fn pump(first: Bytes, mut upstream: ByteStream, tx: mpsc::Sender<Bytes>, idle: Duration) {
    let started = Instant::now();
    let mut observed = FrameDecoder::new();
    let mut forwarded = 0usize;
    let mut pending = Some(first);
    let mut last = Instant::now();

    let outcome = loop {
        if let Some(bytes) = pending.take() {
            observed.extend(&bytes);
            while observed.next_frame().is_some() {}
            forwarded += bytes.len();
            if tx.send(bytes).await.is_err() {
                break Outcome::ClientGone;
            }
            // Time blocked on a slow client is not backend idleness.
            last = Instant::now();
        }
        tokio::select! {
            chunk = upstream.next() => {
                match chunk {
                    Some(Ok(b)) => {
                        last = Instant::now();
                        pending = Some(b);
                    }
                    Some(Err(e)) => {
                        warn!(target: "relay::chat", "backend stream failed after {} bytes: {}", forwarded, e);
                        break Outcome::Failed;
                    }
                    None => break Outcome::Completed,
                }
            }
            _ = tx.closed() => break Outcome::ClientGone,
            _ = sleep(IDLE_POLL) => {
                if last.elapsed() > idle {
                    warn!(target: "relay::chat", "backend idle for {:?}; closing stream", idle);
                    break Outcome::Failed;
                }
            }
        }
    };

    let stats = observed.stats();
    let marker = match outcome {
        Outcome::Completed => {
            if !stats.saw_final_chunk {
                warn!(target: "relay::chat", "backend closed without a final chunk");
            }
            STREAM_END_MARKER
        }
        Outcome::Failed => STREAM_ERROR_MARKER,
        Outcome::ClientGone => {
            info!(target: "relay::chat", "client disconnected after {} bytes; abandoning backend stream", forwarded);
            return;
        }
    };
    let _ = tx.send(Bytes::from_static(marker)).await;
    info!(
        target: "relay::chat",
        "turn finished ok={} bytes={} chunks={} dropped={} elapsed_ms={}",
        matches!(outcome, Outcome::Completed),
        forwarded,
        stats.chunks,
        stats.dropped(),
        started.elapsed().as_millis()
    );
}

fn stream_response(mut rx: mpsc::Receiver<Bytes>) -> Response {
    let body = async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield Ok::<Bytes, Infallible>(chunk);
        }
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    (headers, Body::from_stream(body)).into_response()
}
