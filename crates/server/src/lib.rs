pub mod config;
pub mod error;
pub mod http;
pub mod pod;
pub mod relay;

use std::sync::Arc;
use std::time::Duration;

use relay_core::llm::{ChatOpts, ModelClient};
use relay_core::pod::PodController;

/// Shared, read-only state handed to every request.
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn ModelClient>,
    pub pods: Option<Arc<dyn PodController>>,
    pub opts: ChatOpts,
    /// Ask the pod controller to resume the backend before each turn.
    pub ensure_pod_on_turn: bool,
    pub stream_idle_timeout: Duration,
}

impl AppState {
    pub fn new(backend: Arc<dyn ModelClient>, opts: ChatOpts) -> Self {
        Self {
            backend,
            pods: None,
            opts,
            ensure_pod_on_turn: false,
            stream_idle_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_pods(mut self, pods: Arc<dyn PodController>) -> Self {
        self.pods = Some(pods);
        self
    }

    pub fn with_ensure_pod_on_turn(mut self, on: bool) -> Self {
        self.ensure_pod_on_turn = on;
        self
    }

    pub fn with_stream_idle_timeout(mut self, idle: Duration) -> Self {
        self.stream_idle_timeout = idle;
        self
    }
}
