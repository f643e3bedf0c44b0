use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use providers::ollama::{OllamaClient, OllamaConfig};
use providers::relay::reconstruct;
use relay_core::llm::{ByteStream, ChatError, ChatMessage, ChatOpts, ModelClient};
use relay_core::pod::{PodController, PodError};
use serde_json::{json, Value};
use server::{http::router, AppState};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn ollama_app(server: &MockServer) -> Router {
    let mut cfg = OllamaConfig::new(server.uri());
    cfg.connect_attempts = 1;
    cfg.timeout = Duration::from_secs(5);
    let client = OllamaClient::new(cfg).unwrap();
    let opts = client.default_opts();
    router(AppState::new(Arc::new(client), opts).with_stream_idle_timeout(Duration::from_secs(5)))
}

fn fake_app(backend: impl ModelClient + 'static) -> AppState {
    AppState::new(
        Arc::new(backend),
        ChatOpts {
            model: "test-model".into(),
        },
    )
    .with_stream_idle_timeout(Duration::from_secs(5))
}

fn chat_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chat")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn hi() -> Value {
    json!({"messages": [{"role": "user", "content": "hi"}]})
}

async fn body_text(resp: axum::response::Response) -> String {
    let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(body.to_vec()).unwrap()
}

/// Backend that replays fixed items and then ends, fails, or stalls.
struct ScriptedBackend {
    items: Vec<Result<&'static str, &'static str>>,
    stall_after: bool,
    dropped: Arc<AtomicBool>,
}

impl ScriptedBackend {
    fn new(items: Vec<Result<&'static str, &'static str>>) -> Self {
        Self {
            items,
            stall_after: false,
            dropped: Arc::new(AtomicBool::new(false)),
        }
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ModelClient for ScriptedBackend {
    async fn stream_chat(&self, _msgs: &[ChatMessage], _opts: &ChatOpts) -> Result<ByteStream, ChatError> {
        let items = self.items.clone();
        let stall = self.stall_after;
        let flag = DropFlag(self.dropped.clone());
        Ok(Box::pin(async_stream::stream! {
            let _flag = flag;
            for item in items {
                match item {
                    Ok(s) => yield Ok(Bytes::from_static(s.as_bytes())),
                    Err(e) => yield Err(ChatError::Network(e.to_string())),
                }
            }
            if stall {
                futures::future::pending::<()>().await;
            }
        }))
    }
}

/// Backend that sends `lines` chunks back to back, pauses, then finishes.
struct PausingBackend {
    lines: usize,
    pause: Duration,
}

#[async_trait]
impl ModelClient for PausingBackend {
    async fn stream_chat(&self, _msgs: &[ChatMessage], _opts: &ChatOpts) -> Result<ByteStream, ChatError> {
        let lines = self.lines;
        let pause = self.pause;
        Ok(Box::pin(async_stream::stream! {
            for _ in 0..lines {
                yield Ok(Bytes::from_static(b"{\"message\":{\"content\":\"x\"}}\n"));
            }
            tokio::time::sleep(pause).await;
            yield Ok(Bytes::from_static(b"{\"message\":{\"content\":\"\"},\"done\":true}\n"));
        }))
    }
}

struct FakePods {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl PodController for FakePods {
    async fn ensure_running(&self) -> Result<Value, PodError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(PodError::Api("pod not found".into()));
        }
        Ok(json!({"data": {"podResume": {"id": "p1", "desiredStatus": "RUNNING"}}}))
    }

    async fn ensure_stopped(&self) -> Result<Value, PodError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({"data": {"podStop": {"id": "p1", "desiredStatus": "EXITED"}}}))
    }
}

#[tokio::test]
async fn relays_backend_bytes_and_appends_stream_end() {
    let backend = MockServer::start().await;
    let raw = "{\"message\":{\"role\":\"assistant\",\"content\":\"He\"},\"done\":false}\n\
               {\"message\":{\"role\":\"assistant\",\"content\":\"llo\"},\"done\":false}\n\
               {\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n";
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_string(raw))
        .expect(1)
        .mount(&backend)
        .await;

    let resp = ollama_app(&backend).oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");
    assert_eq!(resp.headers()["cache-control"], "no-cache");

    let text = body_text(resp).await;
    assert_eq!(text, format!("{raw}\n[STREAM_END]\n"));

    let mut updates = Vec::new();
    let source = futures::stream::iter(vec![Ok::<_, ChatError>(Bytes::from(text))]);
    let reply = reconstruct(source, Duration::from_secs(5), |p| updates.push(p.to_string()))
        .await
        .unwrap();
    assert_eq!(updates, vec!["He", "Hello"]);
    assert_eq!(reply, "Hello");
}

#[tokio::test]
async fn invalid_turns_are_rejected_without_backend_call() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&backend)
        .await;
    let app = ollama_app(&backend);

    for body in [
        json!({}),
        json!({"messages": "hi"}),
        json!({"messages": {"role": "user"}}),
        json!({"messages": []}),
        json!({"messages": [{"role": "user"}]}),
    ] {
        let resp = app.clone().oneshot(chat_request(body.clone())).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body {body}");
        let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
        assert!(v["error"].is_string());
    }
}

#[tokio::test]
async fn backend_error_status_becomes_json_500() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/chat"))
        .respond_with(ResponseTemplate::new(404).set_body_string("{\"error\":\"model not found\"}"))
        .mount(&backend)
        .await;

    let resp = ollama_app(&backend).oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.headers()["content-type"], "application/json");
    let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(v["error"], "Failed to reach inference backend");
    assert!(v["details"].as_str().unwrap().contains("model not found"));
}

#[tokio::test]
async fn unreachable_backend_becomes_json_500() {
    let mut cfg = OllamaConfig::new("http://127.0.0.1:9");
    cfg.connect_attempts = 1;
    cfg.timeout = Duration::from_secs(2);
    let client = OllamaClient::new(cfg).unwrap();
    let opts = client.default_opts();
    let app = router(AppState::new(Arc::new(client), opts));

    let resp = app.oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn failure_before_first_byte_is_not_streamed() {
    let state = fake_app(ScriptedBackend::new(vec![Err("connection reset")]));
    let resp = router(state).oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(v["details"], "network: connection reset");
}

#[tokio::test]
async fn empty_backend_body_is_not_streamed() {
    let state = fake_app(ScriptedBackend::new(vec![]));
    let resp = router(state).oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn mid_stream_failure_is_reported_in_band() {
    let state = fake_app(ScriptedBackend::new(vec![
        Ok("{\"message\":{\"content\":\"par\"}}\n{\"message\":{\"con"),
        Err("backend went away"),
    ]));
    let resp = router(state).oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = body_text(resp).await;
    assert!(text.ends_with("\n[STREAM_ERROR]\n"));
    assert!(!text.contains("[STREAM_END]"));
    assert_eq!(text.matches("[STREAM_ERROR]").count(), 1);

    let source = futures::stream::iter(vec![Ok::<_, ChatError>(Bytes::from(text))]);
    match reconstruct(source, Duration::from_secs(5), |_| {}).await {
        Err(ChatError::MidStreamFailure { partial }) => assert_eq!(partial, "par"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn stalled_backend_hits_idle_timeout() {
    let mut backend = ScriptedBackend::new(vec![Ok("{\"message\":{\"content\":\"x\"}}\n")]);
    backend.stall_after = true;
    let state = fake_app(backend).with_stream_idle_timeout(Duration::from_millis(200));
    let resp = router(state).oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = tokio::time::timeout(Duration::from_secs(5), body_text(resp))
        .await
        .expect("relay should give up on an idle backend");
    assert_eq!(text, "{\"message\":{\"content\":\"x\"}}\n\n[STREAM_ERROR]\n");
}

#[tokio::test]
async fn slow_client_does_not_count_as_backend_idle() {
    // More lines than the relay channel holds, so the pump blocks on the client.
    let backend = PausingBackend {
        lines: 20,
        pause: Duration::from_millis(800),
    };
    let state = fake_app(backend).with_stream_idle_timeout(Duration::from_secs(1));
    let resp = router(state).oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(700)).await;
    let text = tokio::time::timeout(Duration::from_secs(5), body_text(resp))
        .await
        .unwrap();
    assert!(text.ends_with("\"done\":true}\n\n[STREAM_END]\n"), "got tail {:?}", &text[text.len().saturating_sub(60)..]);
    assert!(!text.contains("[STREAM_ERROR]"));

    let source = futures::stream::iter(vec![Ok::<_, ChatError>(Bytes::from(text))]);
    let reply = reconstruct(source, Duration::from_secs(5), |_| {}).await.unwrap();
    assert_eq!(reply, "x".repeat(20));
}

#[tokio::test]
async fn final_line_without_newline_is_closed_by_end_marker() {
    let state = fake_app(ScriptedBackend::new(vec![
        Ok("{\"message\":{\"content\":\"He\"}}\n"),
        Ok("{\"message\":{\"content\":\"llo\"},\"done\":true}"),
    ]));
    let resp = router(state).oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let text = body_text(resp).await;
    assert_eq!(
        text,
        "{\"message\":{\"content\":\"He\"}}\n{\"message\":{\"content\":\"llo\"},\"done\":true}\n[STREAM_END]\n"
    );

    let mut updates = Vec::new();
    let source = futures::stream::iter(vec![Ok::<_, ChatError>(Bytes::from(text))]);
    let reply = reconstruct(source, Duration::from_secs(5), |p| updates.push(p.to_string()))
        .await
        .unwrap();
    assert_eq!(updates, vec!["He", "Hello"]);
    assert_eq!(reply, "Hello");
}

#[tokio::test]
async fn client_disconnect_abandons_backend_read() {
    let mut backend = ScriptedBackend::new(vec![Ok("{\"message\":{\"content\":\"x\"}}\n")]);
    backend.stall_after = true;
    let dropped = backend.dropped.clone();
    let resp = router(fake_app(backend)).oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let mut body = resp.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    assert_eq!(&first[..], b"{\"message\":{\"content\":\"x\"}}\n");
    drop(body);

    for _ in 0..50 {
        if dropped.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("backend stream still alive after client went away");
}

#[tokio::test]
async fn pod_resume_failure_does_not_block_turn() {
    let pods = Arc::new(FakePods {
        calls: AtomicUsize::new(0),
        fail: true,
    });
    let state = fake_app(ScriptedBackend::new(vec![Ok("{\"message\":{\"content\":\"ok\"}}\n")]))
        .with_pods(pods.clone())
        .with_ensure_pod_on_turn(true);
    let resp = router(state).oneshot(chat_request(hi())).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_text(resp).await.ends_with("[STREAM_END]\n"));
    assert_eq!(pods.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pod_routes() {
    let post = |uri: &str| {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    };

    let bare = router(fake_app(ScriptedBackend::new(vec![])));
    let resp = bare.oneshot(post("/pod/start")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(v, json!({"error": "Missing RunPod credentials"}));

    let pods = Arc::new(FakePods {
        calls: AtomicUsize::new(0),
        fail: false,
    });
    let app = router(fake_app(ScriptedBackend::new(vec![])).with_pods(pods.clone()));
    let resp = app.clone().oneshot(post("/pod/start")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(v["success"], true);
    assert_eq!(v["data"]["data"]["podResume"]["desiredStatus"], "RUNNING");

    let resp = app.oneshot(post("/pod/stop")).await.unwrap();
    let v: Value = serde_json::from_str(&body_text(resp).await).unwrap();
    assert_eq!(v["data"]["data"]["podStop"]["desiredStatus"], "EXITED");
    assert_eq!(pods.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn health_probe() {
    let app = router(fake_app(ScriptedBackend::new(vec![])));
    let resp = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_text(resp).await, "{\"status\":\"ok\"}");
}
