//! `latchkey check-config`: load, validate and report on the config file.

use anyhow::{bail, Context, Result};
use latchkey_config::{
    apply_all_defaults, apply_env_overrides, load_raw, resolve_env_vars_with, validate, write_config,
    LatchkeyConfig, ValidationReport,
};
use std::collections::HashMap;
use std::path::Path;

use crate::terminal_output::{note_error, note_info, note_success, note_warn};

pub async fn run(path: &Path, write_defaults: bool) -> Result<()> {
    note_info(&format!("Checking {}", path.display()));
    if !path.exists() {
        note_warn("Config file does not exist; built-in defaults apply");
    }

    let env: HashMap<String, String> = std::env::vars().collect();
    let raw = load_raw(path).await?;
    let (config, report) = check(raw, &env)?;

    for warning in &report.warnings {
        note_warn(&format!("{}: {}", warning.path, warning.message));
    }
    for error in &report.errors {
        note_error(&format!("{}: {}", error.path, error.message));
    }
    if !report.is_valid() {
        bail!("{} config error(s) found", report.errors.len());
    }

    note_success(&format!(
        "Config is valid; gateway would listen on {}:{}",
        config.bind(),
        config.port()
    ));
    match (config.rp_id(), config.origin()) {
        (Some(rp_id), Some(origin)) => note_info(&format!("Passkeys bound to {rp_id} ({origin})")),
        _ => note_info("Relying party is derived from each request's Host header"),
    }

    if write_defaults {
        write_config(&config, path).await?;
        note_success(&format!("Wrote config with defaults to {}", path.display()));
    }
    Ok(())
}

/// Run the load pipeline but keep the report instead of failing on it.
fn check(raw: serde_json::Value, env: &HashMap<String, String>) -> Result<(LatchkeyConfig, ValidationReport)> {
    let value = resolve_env_vars_with(&raw, env)?;
    let config: LatchkeyConfig = serde_json::from_value(value).context("Config has an unexpected shape")?;
    let config = apply_all_defaults(apply_env_overrides(config, env)?);
    let report = validate(&config);
    Ok((config, report))
}
