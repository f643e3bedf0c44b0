use std::net::SocketAddr;
use std::time::Duration;

use providers::config::{env_bool, env_string, env_u64, FileConfig};
use providers::ollama::OllamaConfig;
use providers::runpod::RunPodConfig;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub addr: SocketAddr,
    pub backend: OllamaConfig,
    pub pod: Option<RunPodConfig>,
    pub ensure_pod_on_turn: bool,
    pub stream_idle_timeout: Duration,
}

impl RelayConfig {
    /// `port` comes from the command line and wins over `PORT` and the file.
    pub fn from_env_and_file(file: &FileConfig, port: Option<u16>) -> anyhow::Result<Self> {
        let relay = file.relay.clone().unwrap_or_default();
        let host = env_string("RELAY_BIND")
            .or(relay.host)
            .unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match port {
            Some(p) => p,
            None => match env_string("PORT") {
                Some(p) => p
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("PORT is not a valid port: {:?}", p))?,
                None => relay.port.unwrap_or(DEFAULT_PORT),
            },
        };
        let addr: SocketAddr = format!("{}:{}", host, port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address {}:{}: {}", host, port, e))?;

        let idle_ms = env_u64("STREAM_IDLE_TIMEOUT_MS")
            .or(relay.stream_idle_timeout_ms)
            .unwrap_or(300_000);

        Ok(RelayConfig {
            addr,
            backend: OllamaConfig::from_env_and_file(file)?,
            pod: RunPodConfig::from_env_and_file(file)?,
            ensure_pod_on_turn: env_bool("ENSURE_POD_ON_TURN")
                .or(relay.ensure_pod_on_turn)
                .unwrap_or(false),
            stream_idle_timeout: Duration::from_millis(idle_ms),
        })
    }
}
