//! What the agent does when an `UNLOCK` arrives.
//!
//! Lock-screen control is platform specific, so the agent only runs an
//! operator-supplied command.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{info, warn};

/// Environment variable carrying the delivery token, when the unlock had one.
pub const TOKEN_ENV: &str = "LATCHKEY_UNLOCK_TOKEN";

#[async_trait]
pub trait UnlockAction: Send + Sync {
    async fn unlock(&self, token: Option<&str>) -> Result<()>;
}

#[derive(Debug, Clone, Default)]
pub struct CommandUnlock {
    command: Vec<String>,
}

impl CommandUnlock {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl UnlockAction for CommandUnlock {
    async fn unlock(&self, token: Option<&str>) -> Result<()> {
        let Some((program, args)) = self.command.split_first() else {
            warn!("Unlock received but no unlock command is configured");
            return Ok(());
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(token) = token {
            cmd.env(TOKEN_ENV, token);
        }
        let status = cmd
            .status()
            .await
            .with_context(|| format!("Failed to run unlock command '{program}'"))?;
        if !status.success() {
            bail!("Unlock command '{program}' exited with {status}");
        }
        info!(program = %program, "Unlock command completed");
        Ok(())
    }
}
