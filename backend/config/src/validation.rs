//! Config validation: checks with user-friendly error messages.

use crate::schema::LatchkeyConfig;
use thiserror::Error;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "off"];

/// A config validation error with field path and message.
#[derive(Debug, Error)]
#[error("Config validation error at '{path}': {message}")]
pub struct ConfigValidationError {
    pub path: String,
    pub message: String,
}

/// A collection of validation errors found in one pass.
#[derive(Debug, Default)]
pub struct ValidationReport {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }

    fn warn(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate the config and return a report of all errors and warnings.
pub fn validate(config: &LatchkeyConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    validate_server(config, &mut report);
    validate_webauthn(config, &mut report);
    validate_unlock(config, &mut report);
    validate_logging(config, &mut report);
    report
}

fn validate_server(config: &LatchkeyConfig, report: &mut ValidationReport) {
    let Some(server) = &config.server else { return };
    if let Some(port) = server.port {
        if port != 0 && port < 1024 && port != 80 && port != 443 {
            report.warn(
                "server.port",
                format!("Port {port} requires elevated privileges; consider using a port >= 1024"),
            );
        }
    }
    if let Some(bind) = &server.bind {
        if bind.trim().is_empty() {
            report.error("server.bind", "bind address cannot be empty");
        }
    }
}

/// Host part of an origin such as `https://unlock.example.com:8443`.
fn origin_host(origin: &str) -> Option<&str> {
    let rest = origin
        .strip_prefix("https://")
        .or_else(|| origin.strip_prefix("http://"))?;
    let authority = rest.split('/').next().unwrap_or(rest);
    let host = authority.split(':').next().unwrap_or(authority);
    (!host.is_empty()).then_some(host)
}

fn validate_webauthn(config: &LatchkeyConfig, report: &mut ValidationReport) {
    let Some(webauthn) = &config.webauthn else { return };

    if webauthn.ceremony_timeout_secs == Some(0) {
        report.error("webauthn.ceremonyTimeoutSecs", "ceremonyTimeoutSecs must be >= 1");
    }

    let origin_host = match webauthn.origin.as_deref() {
        Some(origin) => match origin_host(origin) {
            Some(host) => Some(host),
            None => {
                report.error(
                    "webauthn.origin",
                    format!("origin '{origin}' must start with http:// or https:// and name a host"),
                );
                None
            }
        },
        None => None,
    };

    match (webauthn.rp_id.as_deref(), origin_host) {
        (Some(rp_id), Some(host)) => {
            if host != rp_id && !host.ends_with(&format!(".{rp_id}")) {
                report.error(
                    "webauthn.rpId",
                    format!("rpId '{rp_id}' must equal or be a parent domain of origin host '{host}'"),
                );
            }
        }
        (Some(_), None) if webauthn.origin.is_none() => report.warn(
            "webauthn.origin",
            "rpId is fixed but origin is not; origin will be derived from each request",
        ),
        (None, Some(_)) => report.warn(
            "webauthn.rpId",
            "origin is fixed but rpId is not; rpId will be derived from each request",
        ),
        _ => {}
    }
}

fn validate_unlock(config: &LatchkeyConfig, report: &mut ValidationReport) {
    let Some(unlock) = &config.unlock else { return };
    let fields = [
        ("unlock.passkeyTokenTtlSecs", unlock.passkey_token_ttl_secs),
        ("unlock.hmacTokenTtlSecs", unlock.hmac_token_ttl_secs),
        ("unlock.sweepIntervalSecs", unlock.sweep_interval_secs),
        ("unlock.hmacWindowSecs", unlock.hmac_window_secs),
    ];
    for (path, value) in fields {
        if value == Some(0) {
            report.error(path, "must be >= 1");
        }
    }
    if let (Some(hmac), Some(passkey)) = (unlock.hmac_token_ttl_secs, unlock.passkey_token_ttl_secs) {
        if hmac > passkey {
            report.warn(
                "unlock.hmacTokenTtlSecs",
                "HMAC-path tokens outlive passkey-path tokens; the HMAC path is meant to be the shorter one",
            );
        }
    }
}

fn validate_logging(config: &LatchkeyConfig, report: &mut ValidationReport) {
    let Some(level) = config.logging.as_ref().and_then(|l| l.level.as_deref()) else { return };
    // Full EnvFilter directives (`latchkey_gateway=debug`) are passed through.
    if !level.contains('=') && !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
        report.warn("logging.level", format!("Unknown log level '{level}'; the filter may reject it"));
    }
}
