//! latchkey runtime configuration schema.
//!
//! Every section and field is optional in the file; the accessor methods on
//! [`LatchkeyConfig`] resolve unset values to the defaults in
//! [`crate::defaults`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::defaults::*;

/// Root configuration (`config.yaml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatchkeyConfig {
    /// HTTP listener
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerConfig>,

    /// Relying party and ceremony settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webauthn: Option<WebauthnConfig>,

    /// Unlock delivery timing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlock: Option<UnlockConfig>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebauthnConfig {
    /// Fixed relying-party id; derived from the request `Host` when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rp_id: Option<String>,
    /// Fixed expected origin; derived from the request when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rp_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceremony_timeout_secs: Option<u64>,
    /// Accept passkeys whose signature counter is always zero.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_counterless_authenticators: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passkey_token_ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_token_ttl_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sweep_interval_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac_window_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivered_retention_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    /// Directory for rolling JSON log files; console only when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    /// Emit console logs as JSON instead of human-readable lines.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json: Option<bool>,
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

impl LatchkeyConfig {
    pub fn bind(&self) -> &str {
        self.server
            .as_ref()
            .and_then(|s| s.bind.as_deref())
            .unwrap_or(DEFAULT_BIND)
    }

    pub fn port(&self) -> u16 {
        self.server.as_ref().and_then(|s| s.port).unwrap_or(DEFAULT_PORT)
    }

    pub fn rp_id(&self) -> Option<&str> {
        self.webauthn.as_ref().and_then(|w| w.rp_id.as_deref())
    }

    pub fn origin(&self) -> Option<&str> {
        self.webauthn.as_ref().and_then(|w| w.origin.as_deref())
    }

    pub fn rp_name(&self) -> &str {
        self.webauthn
            .as_ref()
            .and_then(|w| w.rp_name.as_deref())
            .unwrap_or(DEFAULT_RP_NAME)
    }

    pub fn ceremony_timeout(&self) -> Duration {
        secs(
            self.webauthn.as_ref().and_then(|w| w.ceremony_timeout_secs),
            DEFAULT_CEREMONY_TIMEOUT_SECS,
        )
    }

    pub fn allow_counterless_authenticators(&self) -> bool {
        self.webauthn
            .as_ref()
            .and_then(|w| w.allow_counterless_authenticators)
            .unwrap_or(false)
    }

    fn unlock_field(&self, field: impl Fn(&UnlockConfig) -> Option<u64>, default: u64) -> Duration {
        secs(self.unlock.as_ref().and_then(field), default)
    }

    pub fn passkey_token_ttl(&self) -> Duration {
        self.unlock_field(|u| u.passkey_token_ttl_secs, DEFAULT_PASSKEY_TOKEN_TTL_SECS)
    }

    pub fn hmac_token_ttl(&self) -> Duration {
        self.unlock_field(|u| u.hmac_token_ttl_secs, DEFAULT_HMAC_TOKEN_TTL_SECS)
    }

    pub fn sweep_interval(&self) -> Duration {
        self.unlock_field(|u| u.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS)
    }

    pub fn hmac_window(&self) -> Duration {
        self.unlock_field(|u| u.hmac_window_secs, DEFAULT_HMAC_WINDOW_SECS)
    }

    pub fn delivered_retention(&self) -> Duration {
        self.unlock_field(|u| u.delivered_retention_secs, DEFAULT_DELIVERED_RETENTION_SECS)
    }

    pub fn log_level(&self) -> &str {
        self.logging
            .as_ref()
            .and_then(|l| l.level.as_deref())
            .unwrap_or(DEFAULT_LOG_LEVEL)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.logging
            .as_ref()
            .and_then(|l| l.dir.as_deref())
            .filter(|d| !d.trim().is_empty())
            .map(PathBuf::from)
    }

    pub fn log_json(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.json).unwrap_or(false)
    }
}
