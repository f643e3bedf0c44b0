use axum::{
    routing::{get, post},
    Json, Router,
};

use crate::{pod, relay, AppState};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/chat", post(relay::chat))
        .route("/pod/start", post(pod::start))
        .route("/pod/stop", post(pod::stop))
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
