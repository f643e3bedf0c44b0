use crate::http::snippet;
use crate::runpod::config::RunPodConfig;
use async_trait::async_trait;
use relay_core::pod::{PodController, PodError};
use reqwest::{header, Client};
use tracing::{error, info};

/// Resumes and stops a single RunPod pod through the GraphQL API.
#[derive(Clone)]
pub struct RunPodClient {
    http: Client,
    cfg: RunPodConfig,
}

impl RunPodClient {
    pub fn new(cfg: RunPodConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", cfg.api_key))?,
        );
        let http = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .timeout(cfg.timeout)
            .build()?;
        Ok(Self { http, cfg })
    }

    fn mutation(&self, op: &str) -> String {
        // JSON string literals are valid GraphQL string literals.
        let pod_id = serde_json::Value::String(self.cfg.pod_id.clone());
        format!("mutation {{ {op}(input: {{ podId: {pod_id} }}) {{ id desiredStatus }} }}")
    }

    async fn run_mutation(&self, op: &str) -> Result<serde_json::Value, PodError> {
        info!(target: "providers::runpod", "{} pod={}", op, self.cfg.pod_id);
        let resp = self
            .http
            .post(&self.cfg.api_url)
            .json(&serde_json::json!({ "query": self.mutation(op) }))
            .send()
            .await
            .map_err(|e| PodError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = snippet(resp.text().await.ok());
            error!(target: "providers::runpod", "{} failed status={} body={:?}", op, status, body);
            return Err(PodError::Api(format!("{} {}", status.as_u16(), body)));
        }
        let data: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| PodError::Decode(e.to_string()))?;
        if let Some(first) = data["errors"].as_array().and_then(|errs| errs.first()) {
            let msg = first["message"].as_str().unwrap_or("unknown error").to_string();
            error!(target: "providers::runpod", "{} rejected: {}", op, msg);
            return Err(PodError::Api(msg));
        }
        Ok(data)
    }
}

#[async_trait]
impl PodController for RunPodClient {
    async fn ensure_running(&self) -> Result<serde_json::Value, PodError> {
        self.run_mutation("podResume").await
    }

    async fn ensure_stopped(&self) -> Result<serde_json::Value, PodError> {
        self.run_mutation("podStop").await
    }
}
