mod api;
mod check_config_cmd;
mod config;
mod pair_cmd;
mod status_cmd;
mod terminal_output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use latchkey_gateway::{start_server, GatewayState};

const DEFAULT_URL: &str = "http://127.0.0.1:8080";

#[derive(Parser)]
#[command(name = "latchkey")]
#[command(about = "Latchkey: unlock your laptop from your phone")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the latchkey gateway
    Serve {
        /// Config file (defaults to ~/.latchkey/config.yaml)
        #[arg(short, long, env = "LATCHKEY_CONFIG")]
        config: Option<PathBuf>,
        /// Address to bind the HTTP server to
        #[arg(long)]
        bind: Option<String>,
        /// Port to bind the HTTP server to
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show the health of a running gateway
    Status {
        #[arg(long, env = "LATCHKEY_URL", default_value = DEFAULT_URL)]
        url: String,
    },
    /// Pair this laptop with a gateway
    Pair {
        #[arg(long, env = "LATCHKEY_URL", default_value = DEFAULT_URL)]
        url: String,
        /// Display name for the device
        #[arg(long)]
        name: Option<String>,
        /// Save the grant as the agent config instead of printing the secret
        #[arg(long)]
        write_agent_config: bool,
        /// Agent config file used with --write-agent-config
        #[arg(long)]
        agent_config: Option<PathBuf>,
        /// Command the agent runs on unlock, e.g. `-- loginctl unlock-sessions`
        #[arg(last = true)]
        unlock_command: Vec<String>,
    },
    /// Validate the config file
    CheckConfig {
        #[arg(short, long, env = "LATCHKEY_CONFIG")]
        config: Option<PathBuf>,
        /// Write the resolved config, defaults included, back to the file
        #[arg(long)]
        write_defaults: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config, bind, port } => {
            let path = config::config_path(config);
            let cfg = latchkey_config::load_and_prepare(&path).await?;
            latchkey_logging::init_logger(cfg.log_dir(), cfg.log_level(), cfg.log_json());

            let addr = config::listen_addr(&cfg, bind.as_deref(), port)?;
            info!(config = %path.display(), addr = %addr, "Starting latchkey gateway");
            let state = GatewayState::new(config::gateway_settings(&cfg));
            start_server(addr, state).await?;
        }
        Commands::Status { url } => status_cmd::run(&url).await?,
        Commands::Pair {
            url,
            name,
            write_agent_config,
            agent_config,
            unlock_command,
        } => {
            let agent_config = write_agent_config
                .then(|| agent_config.unwrap_or_else(latchkey_agent::AgentConfig::default_path));
            pair_cmd::run(pair_cmd::PairOptions {
                url,
                name,
                agent_config,
                unlock_command,
            })
            .await?;
        }
        Commands::CheckConfig { config, write_defaults } => {
            let path = config::config_path(config);
            check_config_cmd::run(&path, write_defaults).await?;
        }
    }

    Ok(())
}
