//! Structured logging for latchkey.
//!
//! Console plus rolling NDJSON file output, redaction of pairing secrets and
//! tokens, and a dedicated `security_events` stream.

pub mod logger;
pub mod redact;
pub mod security_log;

pub use logger::init_logger;
pub use redact::redact_sensitive_data;
pub use security_log::{SecurityEvent, SecurityEventLogger, SecurityLogEntry};
