//! Environment handling for config values.
//!
//! - `${VAR_NAME}` in any string value is replaced at load time. Only uppercase
//!   `[A-Z_][A-Z0-9_]*` names are matched; `$${VAR}` escapes to a literal `${VAR}`.
//! - `LATCHKEY_*` variables override individual settings after the file is read.

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;

use crate::schema::{LatchkeyConfig, LoggingConfig, ServerConfig, WebauthnConfig};

/// Matches `${VAR}` and its escaped form `$${VAR}`.
static ENV_VAR_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\$?)\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid regex"));

pub const ENV_PORT: &str = "LATCHKEY_PORT";
pub const ENV_BIND: &str = "LATCHKEY_BIND";
pub const ENV_RP_ID: &str = "LATCHKEY_RP_ID";
pub const ENV_ORIGIN: &str = "LATCHKEY_ORIGIN";
pub const ENV_LOG_LEVEL: &str = "LATCHKEY_LOG_LEVEL";

/// Error returned for missing env vars.
#[derive(Debug, thiserror::Error)]
#[error("Missing env var \"{var_name}\" referenced at config path: {config_path}")]
pub struct MissingEnvVarError {
    pub var_name: String,
    pub config_path: String,
}

/// Substitute `${VAR}` references in a config value tree using the process env.
pub fn resolve_env_vars(value: &Value) -> Result<Value> {
    resolve_env_vars_with(value, &std::env::vars().collect())
}

/// Substitute env vars using a provided map.
pub fn resolve_env_vars_with(value: &Value, env: &HashMap<String, String>) -> Result<Value> {
    substitute_value(value, env, "")
}

fn substitute_value(value: &Value, env: &HashMap<String, String>, path: &str) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(substitute_string(s, env, path)?)),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| substitute_value(v, env, &format!("{path}[{i}]")))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                let child = if path.is_empty() { k.clone() } else { format!("{path}.{k}") };
                out.insert(k.clone(), substitute_value(v, env, &child)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(s: &str, env: &HashMap<String, String>, path: &str) -> Result<String> {
    if !s.contains('$') {
        return Ok(s.to_string());
    }

    let mut missing: Option<MissingEnvVarError> = None;
    let replaced = ENV_VAR_PATTERN.replace_all(s, |caps: &regex::Captures| {
        let name = &caps[2];
        if !caps[1].is_empty() {
            return format!("${{{name}}}");
        }
        match env.get(name) {
            Some(val) if !val.is_empty() => val.clone(),
            _ => {
                missing.get_or_insert_with(|| MissingEnvVarError {
                    var_name: name.to_string(),
                    config_path: path.to_string(),
                });
                String::new()
            }
        }
    });

    if let Some(err) = missing {
        bail!(err);
    }
    Ok(replaced.into_owned())
}

/// Apply `LATCHKEY_*` overrides from `env` on top of a parsed config.
pub fn apply_env_overrides(
    mut config: LatchkeyConfig,
    env: &HashMap<String, String>,
) -> Result<LatchkeyConfig> {
    let get = |key: &str| env.get(key).map(|v| v.trim()).filter(|v| !v.is_empty());

    if let Some(port) = get(ENV_PORT) {
        let port: u16 = port
            .parse()
            .with_context(|| format!("{ENV_PORT} must be a port number, got '{port}'"))?;
        config.server.get_or_insert_with(ServerConfig::default).port = Some(port);
    }
    if let Some(bind) = get(ENV_BIND) {
        config.server.get_or_insert_with(ServerConfig::default).bind = Some(bind.to_string());
    }
    if let Some(rp_id) = get(ENV_RP_ID) {
        config.webauthn.get_or_insert_with(WebauthnConfig::default).rp_id = Some(rp_id.to_string());
    }
    if let Some(origin) = get(ENV_ORIGIN) {
        config.webauthn.get_or_insert_with(WebauthnConfig::default).origin = Some(origin.to_string());
    }
    if let Some(level) = get(ENV_LOG_LEVEL) {
        config.logging.get_or_insert_with(LoggingConfig::default).level = Some(level.to_string());
    }
    Ok(config)
}
