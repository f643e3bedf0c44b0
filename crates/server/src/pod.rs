use axum::{extract::State, Json};
use relay_core::pod::PodError;
use tracing::{error, info};

use crate::{error::ApiError, AppState};

pub async fn start(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    toggle(&state, true).await
}

pub async fn stop(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    toggle(&state, false).await
}

async fn toggle(state: &AppState, start: bool) -> Result<Json<serde_json::Value>, ApiError> {
    let pods = state.pods.as_ref().ok_or(ApiError::PodControlUnavailable)?;
    let res = if start {
        pods.ensure_running().await
    } else {
        pods.ensure_stopped().await
    };
    match res {
        Ok(data) => {
            info!(target: "relay::pod", "pod {} requested", if start { "start" } else { "stop" });
            Ok(Json(serde_json::json!({ "success": true, "data": data })))
        }
        Err(PodError::NotConfigured) => Err(ApiError::PodControlUnavailable),
        Err(e) => {
            error!(target: "relay::pod", "failed to {} pod: {}", if start { "start" } else { "stop" }, e);
            Err(ApiError::PodControl(e.to_string()))
        }
    }
}
