use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::info;

use latchkey_agent::{AgentClient, AgentConfig, CommandUnlock, ConfigOverrides};

#[derive(Parser)]
#[command(name = "latchkey-agent")]
#[command(about = "Holds the latchkey control connection and unlocks this laptop on request")]
#[command(version)]
struct Args {
    /// Agent config file (defaults to ~/.latchkey/agent.json)
    #[arg(short, long, env = "LATCHKEY_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway base URL
    #[arg(long, env = "LATCHKEY_SERVER")]
    server: Option<String>,

    /// Device id returned by `latchkey pair`
    #[arg(long, env = "LATCHKEY_DEVICE_ID")]
    device_id: Option<String>,

    /// Pairing secret returned by `latchkey pair`
    #[arg(long, env = "LATCHKEY_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Write the resolved settings back to the config file
    #[arg(long)]
    save: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Command run on every unlock, e.g. `-- loginctl unlock-sessions`
    #[arg(last = true)]
    unlock_command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    latchkey_logging::init_logger(None::<PathBuf>, &args.log_level, false);

    let path = args.config.clone().unwrap_or_else(AgentConfig::default_path);
    let file = if path.exists() {
        Some(AgentConfig::load(&path).await?)
    } else {
        None
    };
    let config = AgentConfig::resolve(
        file,
        ConfigOverrides {
            server: args.server,
            device_id: args.device_id,
            secret: args.secret,
            unlock_command: (!args.unlock_command.is_empty()).then_some(args.unlock_command),
        },
    )?;
    if args.save {
        config.save(&path).await?;
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            let _ = stop_tx.send(true);
        }
    });

    let unlock = CommandUnlock::new(config.unlock_command.clone());
    AgentClient::new(config, unlock)
        .run_forever(stop_rx)
        .await
        .context("Agent failed")
}
