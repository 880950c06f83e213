//! Agent configuration, stored as JSON next to the service config.

use anyhow::{Context, Result};
use latchkey_core::DeviceId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

use crate::error::AgentError;

pub const AGENT_CONFIG_FILE: &str = "agent.json";
const CONTROL_PATH: &str = "/ws";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Base URL of the gateway, e.g. `https://unlock.example.com`.
    pub server: String,
    pub device_id: DeviceId,
    pub secret: String,
    /// Program and arguments run on every `UNLOCK`. Empty means log only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unlock_command: Vec<String>,
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub server: Option<String>,
    pub device_id: Option<String>,
    pub secret: Option<String>,
    pub unlock_command: Option<Vec<String>>,
}

impl AgentConfig {
    /// Layer `overrides` over an optional file config. Every field must end up set.
    pub fn resolve(file: Option<AgentConfig>, overrides: ConfigOverrides) -> Result<Self> {
        let (server, device_id, secret, unlock_command) = match file {
            Some(c) => (Some(c.server), Some(c.device_id), Some(c.secret), c.unlock_command),
            None => (None, None, None, Vec::new()),
        };
        let server = overrides
            .server
            .or(server)
            .context("No server configured; pass --server or write agent.json")?;
        let device_id = overrides
            .device_id
            .map(DeviceId::new)
            .or(device_id)
            .context("No device id configured; pair the laptop first")?;
        let secret = overrides
            .secret
            .or(secret)
            .context("No pairing secret configured; pair the laptop first")?;
        Ok(Self {
            server,
            device_id,
            secret,
            unlock_command: overrides.unlock_command.unwrap_or(unlock_command),
        })
    }

    pub fn default_path() -> PathBuf {
        latchkey_config::config_dir().join(AGENT_CONFIG_FILE)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read agent config {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse agent config {}", path.display()))
    }

    /// Write the config, readable by the owner only.
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize agent config")?;
        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .await
                .with_context(|| format!("Failed to restrict permissions on {}", path.display()))?;
        }
        info!(path = %path.display(), "Agent config saved");
        Ok(())
    }

    /// WebSocket URL of the control endpoint derived from `server`.
    pub fn control_url(&self) -> Result<String, AgentError> {
        let server = self.server.trim().trim_end_matches('/');
        let (scheme, rest) = server
            .split_once("://")
            .ok_or_else(|| AgentError::InvalidServerUrl(self.server.clone()))?;
        let ws_scheme = match scheme.to_ascii_lowercase().as_str() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            _ => return Err(AgentError::InvalidServerUrl(self.server.clone())),
        };
        if rest.is_empty() {
            return Err(AgentError::InvalidServerUrl(self.server.clone()));
        }
        if rest.ends_with(CONTROL_PATH) {
            return Ok(format!("{ws_scheme}://{rest}"));
        }
        Ok(format!("{ws_scheme}://{rest}{CONTROL_PATH}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(server: &str) -> AgentConfig {
        AgentConfig {
            server: server.into(),
            device_id: DeviceId::from("d1"),
            secret: "s".into(),
            unlock_command: Vec::new(),
        }
    }

    #[test]
    fn control_url_swaps_scheme_and_appends_path() {
        assert_eq!(
            config("https://unlock.example.com/").control_url().unwrap(),
            "wss://unlock.example.com/ws"
        );
        assert_eq!(config("http://localhost:8080").control_url().unwrap(), "ws://localhost:8080/ws");
        assert_eq!(config("ws://10.0.0.2:8080/ws").control_url().unwrap(), "ws://10.0.0.2:8080/ws");
    }

    #[test]
    fn control_url_rejects_other_schemes() {
        assert!(matches!(
            config("ftp://example.com").control_url(),
            Err(AgentError::InvalidServerUrl(_))
        ));
        assert!(config("example.com").control_url().is_err());
    }

    #[test]
    fn overrides_win_over_file() {
        let resolved = AgentConfig::resolve(
            Some(config("https://a.example.com")),
            ConfigOverrides {
                server: Some("https://b.example.com".into()),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(resolved.server, "https://b.example.com");
        assert_eq!(resolved.device_id, DeviceId::from("d1"));
    }

    #[test]
    fn missing_fields_are_reported() {
        let err = AgentConfig::resolve(
            None,
            ConfigOverrides {
                server: Some("https://a.example.com".into()),
                ..Default::default()
            },
        )
        .unwrap_err();
        assert!(err.to_string().contains("device id"));
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("latchkey-agent-{}", std::process::id()));
        let path = dir.join(AGENT_CONFIG_FILE);
        let mut original = config("https://unlock.example.com");
        original.unlock_command = vec!["loginctl".into(), "unlock-sessions".into()];

        original.save(&path).await.unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"deviceId\""));
        assert!(raw.contains("\"unlockCommand\""));
        assert_eq!(AgentConfig::load(&path).await.unwrap(), original);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }
}
