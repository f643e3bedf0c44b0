use std::fmt;
use std::time::Duration;

use tracing::warn;

use crate::config::{env_string, normalize_base_url, FileConfig};

pub const DEFAULT_API_URL: &str = "https://api.runpod.io/graphql";

#[derive(Clone)]
pub struct RunPodConfig {
    pub api_key: String,
    pub pod_id: String,
    pub api_url: String,
    pub timeout: Duration,
}

impl fmt::Debug for RunPodConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunPodConfig")
            .field("api_key", &"<redacted>")
            .field("pod_id", &self.pod_id)
            .field("api_url", &self.api_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RunPodConfig {
    pub fn new(api_key: impl Into<String>, pod_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            pod_id: pod_id.into(),
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// `None` when either credential is missing; pod control is then disabled.
    /// The API key is only read from the environment.
    pub fn from_env_and_file(file: &FileConfig) -> anyhow::Result<Option<Self>> {
        let pod = file.pod.clone().unwrap_or_default();
        let api_key = env_string("RUNPOD_API_KEY");
        let pod_id = env_string("RUNPOD_POD_ID").or(pod.pod_id);
        let (Some(api_key), Some(pod_id)) = (api_key, pod_id) else {
            warn!(target: "providers::runpod", "RunPod credentials missing; pod control disabled");
            return Ok(None);
        };
        let mut cfg = Self::new(api_key, pod_id);
        if let Some(u) = env_string("RUNPOD_API_URL").or(pod.api_url) {
            cfg.api_url = normalize_base_url(&u)?;
        }
        Ok(Some(cfg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_api_key() {
        let cfg = RunPodConfig::new("rp_secret_123", "pod-1");
        let s = format!("{:?}", cfg);
        assert!(!s.contains("rp_secret_123"));
        assert!(s.contains("pod-1"));
    }
}
