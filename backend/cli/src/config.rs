use anyhow::{Context, Result};
use latchkey_config::LatchkeyConfig;
use latchkey_gateway::GatewaySettings;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Config file to use: explicit path, or `config.yaml` in the config dir.
pub fn config_path(explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| latchkey_config::config_file_path(&latchkey_config::config_dir()))
}

/// Gateway runtime knobs from the loaded config.
pub fn gateway_settings(config: &LatchkeyConfig) -> GatewaySettings {
    GatewaySettings {
        passkey_token_ttl: config.passkey_token_ttl(),
        hmac_token_ttl: config.hmac_token_ttl(),
        sweep_interval: config.sweep_interval(),
        hmac_window: config.hmac_window(),
        delivered_retention: config.delivered_retention(),
        ceremony_timeout: config.ceremony_timeout(),
        allow_counterless_authenticators: config.allow_counterless_authenticators(),
        rp_id: config.rp_id().map(String::from),
        origin: config.origin().map(String::from),
        rp_name: config.rp_name().to_string(),
    }
}

/// Socket address to listen on; command-line values win over the file.
pub fn listen_addr(config: &LatchkeyConfig, bind: Option<&str>, port: Option<u16>) -> Result<SocketAddr> {
    let bind = bind.unwrap_or_else(|| config.bind());
    let ip: IpAddr = bind
        .parse()
        .with_context(|| format!("Invalid bind address: {bind}"))?;
    Ok(SocketAddr::new(ip, port.unwrap_or_else(|| config.port())))
}
