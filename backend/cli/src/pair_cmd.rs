//! `latchkey pair`: register this laptop with a gateway.

use anyhow::Result;
use latchkey_agent::AgentConfig;
use std::path::PathBuf;

use crate::api::ApiClient;
use crate::terminal_output::{note_info, note_success, note_warn};

pub struct PairOptions {
    pub url: String,
    pub name: Option<String>,
    /// Write the grant into this agent config file.
    pub agent_config: Option<PathBuf>,
    pub unlock_command: Vec<String>,
}

pub async fn run(opts: PairOptions) -> Result<()> {
    let client = ApiClient::new(&opts.url);
    let pairing = client.pair(opts.name.as_deref()).await?;
    note_success(&format!("Paired as device {}", pairing.device_id));

    match opts.agent_config {
        Some(path) => {
            let config = AgentConfig {
                server: client.base().to_string(),
                device_id: pairing.device_id,
                secret: pairing.secret,
                unlock_command: opts.unlock_command,
            };
            config.save(&path).await?;
            note_info(&format!("Agent config written to {}", path.display()));
        }
        None => {
            println!("  deviceId: {}", pairing.device_id);
            println!("  secret:   {}", pairing.secret);
            note_warn("The secret is shown only once; store it in the agent config now.");
        }
    }
    Ok(())
}
