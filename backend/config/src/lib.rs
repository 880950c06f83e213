//! `latchkey-config`: runtime configuration for the latchkey service.
//!
//! Provides:
//! - Typed config schema (server, webauthn, unlock timing, logging)
//! - YAML read/write
//! - `${ENV_VAR}` substitution and `LATCHKEY_*` overrides
//! - Default value application
//! - Validation with errors and warnings

pub mod defaults;
pub mod env;
pub mod io;
pub mod schema;
pub mod validation;

pub use defaults::apply_all_defaults;
pub use env::{apply_env_overrides, resolve_env_vars, resolve_env_vars_with, MissingEnvVarError};
pub use io::{config_dir, config_file_path, load_config, load_raw, write_config};
pub use schema::LatchkeyConfig;
pub use validation::{validate, ConfigValidationError, ValidationReport};

use anyhow::{bail, Context, Result};
use std::collections::HashMap;
use std::path::Path;

/// Load a config file, substitute env vars, apply `LATCHKEY_*` overrides and
/// defaults, then validate.
///
/// This is the main entry point for loading a config at runtime. Warnings are
/// logged; any validation error fails the load.
pub async fn load_and_prepare(path: &Path) -> Result<LatchkeyConfig> {
    let env: HashMap<String, String> = std::env::vars().collect();
    prepare(load_raw(path).await?, &env)
        .with_context(|| format!("Config at {} is not usable", path.display()))
}

/// The pure part of [`load_and_prepare`].
pub fn prepare(raw: serde_json::Value, env: &HashMap<String, String>) -> Result<LatchkeyConfig> {
    let value = resolve_env_vars_with(&raw, env).context("Failed to resolve env vars in config")?;
    let config: LatchkeyConfig =
        serde_json::from_value(value).context("Failed to deserialize config after processing")?;
    let config = apply_env_overrides(config, env)?;
    let config = apply_all_defaults(config);

    let report = validate(&config);
    for warning in &report.warnings {
        tracing::warn!(path = %warning.path, message = %warning.message, "Config warning");
    }
    if !report.is_valid() {
        let details: Vec<String> = report.errors.iter().map(ToString::to_string).collect();
        bail!("{}", details.join("; "));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prepare_runs_the_whole_pipeline() {
        let raw = json!({
            "webauthn": { "rpId": "example.com", "origin": "https://${UNLOCK_HOST}" }
        });
        let env: HashMap<String, String> = [
            ("UNLOCK_HOST".to_string(), "unlock.example.com".to_string()),
            ("LATCHKEY_PORT".to_string(), "7000".to_string()),
        ]
        .into();
        let cfg = prepare(raw, &env).unwrap();
        assert_eq!(cfg.port(), 7000);
        assert_eq!(cfg.origin(), Some("https://unlock.example.com"));
        assert_eq!(cfg.passkey_token_ttl().as_secs(), 30);
    }

    #[test]
    fn invalid_config_fails_to_prepare() {
        let raw = json!({ "unlock": { "sweepIntervalSecs": 0 } });
        let err = prepare(raw, &HashMap::new()).unwrap_err().to_string();
        assert!(err.contains("unlock.sweepIntervalSecs"));
    }
}
