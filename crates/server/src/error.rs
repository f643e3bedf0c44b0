use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

/// Failures reported before a response stream is opened.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Failed to reach inference backend")]
    BackendUnreachable { details: String },

    #[error("Missing RunPod credentials")]
    PodControlUnavailable,

    #[error("{0}")]
    PodControl(String),
}

impl ApiError {
    pub fn backend_unreachable(details: impl Into<String>) -> Self {
        Self::BackendUnreachable {
            details: details.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::BackendUnreachable { .. }
            | ApiError::PodControlUnavailable
            | ApiError::PodControl(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::BackendUnreachable { details } => {
                serde_json::json!({ "error": self.to_string(), "details": details })
            }
            _ => serde_json::json!({ "error": self.to_string() }),
        };
        (self.status(), Json(body)).into_response()
    }
}
