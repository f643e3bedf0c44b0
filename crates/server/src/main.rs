use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use providers::config::FileConfig;
use providers::ollama::OllamaClient;
use providers::runpod::RunPodClient;
use server::{config::RelayConfig, http, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "chat-relay", about = "Streams chat turns from an Ollama backend to clients")]
struct Args {
    /// TOML config file; defaults to the platform config dir.
    #[arg(long, env = "CHAT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen port; overrides PORT and the config file.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=info,relay=info,providers=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let file = FileConfig::load(args.config.as_deref());
    let cfg = RelayConfig::from_env_and_file(&file, args.port).context("load relay config")?;
    tracing::info!(target: "relay", "backend={} model={}", cfg.backend.base_url, cfg.backend.model);

    let backend = OllamaClient::new(cfg.backend.clone()).context("build backend client")?;
    let mut state = AppState::new(Arc::new(backend.clone()), backend.default_opts())
        .with_ensure_pod_on_turn(cfg.ensure_pod_on_turn)
        .with_stream_idle_timeout(cfg.stream_idle_timeout);
    if let Some(pod) = cfg.pod.clone() {
        let pods = RunPodClient::new(pod).context("build RunPod client")?;
        state = state.with_pods(Arc::new(pods));
    }

    let listener = tokio::net::TcpListener::bind(cfg.addr)
        .await
        .with_context(|| format!("bind {}", cfg.addr))?;
    tracing::info!(target: "relay", "chat relay listening on {}", cfg.addr);
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!(target: "relay", "shutting down");
        })
        .await
        .context("http server crashed")?;
    Ok(())
}
