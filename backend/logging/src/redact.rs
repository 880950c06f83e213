//! Log Redaction Layer
//!
//! Scrubs pairing secrets, HMAC signatures and unlock tokens from strings prior
//! to logging.

use regex::Regex;
use std::sync::LazyLock;

static SECRET_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"("(?:secret|signature)"\s*:\s*")[^"]*(")"#).expect("valid regex")
});
static UNLOCK_TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ulk_[0-9a-fA-F]{8,}").expect("valid regex"));
static LONG_HEX_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[0-9a-fA-F]{64}\b").expect("valid regex"));
static BEARER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Bearer\s+[a-zA-Z0-9\-\._~+/]+=*").expect("valid regex"));

/// Redacts sensitive patterns in a string.
pub fn redact_sensitive_data(input: &str) -> String {
    let mut redacted = SECRET_FIELD_RE
        .replace_all(input, "${1}[REDACTED]${2}")
        .to_string();

    // Unlock tokens keep their prefix so log lines stay greppable.
    redacted = UNLOCK_TOKEN_RE.replace_all(&redacted, "ulk_[REDACTED]").to_string();

    // Bare 256-bit hex values: pairing secrets and HMAC signatures.
    redacted = LONG_HEX_RE.replace_all(&redacted, "[REDACTED_HEX]").to_string();

    redacted = BEARER_RE.replace_all(&redacted, "[REDACTED_TOKEN]").to_string();

    redacted
}
