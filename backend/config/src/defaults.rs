//! Config defaults: applies default values to a parsed config so that a written
//! or displayed config shows the effective settings.

use crate::schema::{LatchkeyConfig, LoggingConfig, ServerConfig, UnlockConfig, WebauthnConfig};

pub const DEFAULT_BIND: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_RP_NAME: &str = "Latchkey";
pub const DEFAULT_CEREMONY_TIMEOUT_SECS: u64 = 300;

/// Queue lifetime of a token minted after a passkey authentication.
pub const DEFAULT_PASSKEY_TOKEN_TTL_SECS: u64 = 30;

/// Queue lifetime of a token minted by the HMAC `/unlock` path.
pub const DEFAULT_HMAC_TOKEN_TTL_SECS: u64 = 10;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_HMAC_WINDOW_SECS: u64 = 30;
pub const DEFAULT_DELIVERED_RETENTION_SECS: u64 = 300;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Apply all defaults to a freshly loaded config.
pub fn apply_all_defaults(config: LatchkeyConfig) -> LatchkeyConfig {
    let config = apply_server_defaults(config);
    let config = apply_webauthn_defaults(config);
    let config = apply_unlock_defaults(config);
    apply_logging_defaults(config)
}

fn apply_server_defaults(mut config: LatchkeyConfig) -> LatchkeyConfig {
    let server = config.server.get_or_insert_with(ServerConfig::default);
    server.bind.get_or_insert_with(|| DEFAULT_BIND.to_string());
    server.port.get_or_insert(DEFAULT_PORT);
    config
}

/// `rpId` and `origin` stay unset: they are derived per request.
fn apply_webauthn_defaults(mut config: LatchkeyConfig) -> LatchkeyConfig {
    let webauthn = config.webauthn.get_or_insert_with(WebauthnConfig::default);
    webauthn.rp_name.get_or_insert_with(|| DEFAULT_RP_NAME.to_string());
    webauthn.ceremony_timeout_secs.get_or_insert(DEFAULT_CEREMONY_TIMEOUT_SECS);
    webauthn.allow_counterless_authenticators.get_or_insert(false);
    config
}

fn apply_unlock_defaults(mut config: LatchkeyConfig) -> LatchkeyConfig {
    let unlock = config.unlock.get_or_insert_with(UnlockConfig::default);
    unlock.passkey_token_ttl_secs.get_or_insert(DEFAULT_PASSKEY_TOKEN_TTL_SECS);
    unlock.hmac_token_ttl_secs.get_or_insert(DEFAULT_HMAC_TOKEN_TTL_SECS);
    unlock.sweep_interval_secs.get_or_insert(DEFAULT_SWEEP_INTERVAL_SECS);
    unlock.hmac_window_secs.get_or_insert(DEFAULT_HMAC_WINDOW_SECS);
    unlock.delivered_retention_secs.get_or_insert(DEFAULT_DELIVERED_RETENTION_SECS);
    config
}

fn apply_logging_defaults(mut config: LatchkeyConfig) -> LatchkeyConfig {
    let logging = config.logging.get_or_insert_with(LoggingConfig::default);
    logging.level.get_or_insert_with(|| DEFAULT_LOG_LEVEL.to_string());
    logging.json.get_or_insert(false);
    config
}
