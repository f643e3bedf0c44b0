mod app;
mod logging;
mod strings;

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;
use app::{Action, App};
use clap::Parser;
use providers::config::FileConfig;
use providers::relay::{ClientConfig, RelayClient};
use relay_core::llm::ChatError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "chat", about = "Terminal chat client for the streaming relay")]
struct Args {
    /// TOML config file; defaults to the platform config dir.
    #[arg(long, env = "CHAT_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Relay base URL; overrides CHAT_RELAY_URL and the config file.
    #[arg(long)]
    endpoint: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = logging::init();
    let args = Args::parse();
    let file = FileConfig::load(args.config.as_deref());
    let mut cfg = ClientConfig::from_env_and_file(&file).context("load client config")?;
    if let Some(endpoint) = args.endpoint {
        cfg.endpoint = providers::config::normalize_base_url(&endpoint)?;
    }
    info!(target: "cli", "relay endpoint={}", cfg.endpoint);
    println!("{} {}", strings::WELCOME, cfg.endpoint);
    println!("{}", strings::HELP);

    let client = RelayClient::new(cfg).context("build relay client")?;
    let mut app = App::new(client, io::stdout());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{}", strings::PREFIX_USER);
        io::stdout().flush().ok();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if let Some(action) = app.try_handle_slash_command(text).await {
            if action == Action::Quit {
                break;
            }
            continue;
        }

        let mut stdin_open = true;
        let res = {
            let turn = app.run_turn(text);
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    res = &mut turn => break res,
                    _ = tokio::signal::ctrl_c() => break Err(ChatError::Canceled),
                    more = lines.next_line(), if stdin_open => match more {
                        Ok(Some(_)) => debug!(target: "cli", "ignored input while a reply is streaming"),
                        _ => stdin_open = false,
                    },
                }
            }
        };
        app.finish_turn(res);
        if !stdin_open {
            break;
        }
    }
    info!(target: "cli", "session ended turns={}", app.conversation().len());
    Ok(())
}
