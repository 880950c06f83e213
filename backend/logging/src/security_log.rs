//! Security Event Logger
//!
//! Rejections and displacements that an operator may want to audit, emitted on
//! the `security_events` tracing target so they can be filtered or routed apart
//! from ordinary request logs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::redact::redact_sensitive_data;

pub const SECURITY_TARGET: &str = "security_events";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    /// An assertion presented a signature counter that did not advance.
    CounterRegression {
        user_id: String,
        credential_id: String,
        stored: u32,
        presented: u32,
    },
    /// A WebAuthn response failed verification.
    CeremonyRejected {
        user_id: String,
        ceremony: String,
        reason: String,
    },
    /// An HMAC device proof failed (bad signature or stale timestamp).
    HmacRejected { device_id: String, channel: String },
    /// A newer control connection replaced a live one for the same device.
    DeviceDisplaced { device_id: String },
}

#[derive(Debug, Serialize)]
pub struct SecurityLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: SecurityEvent,
}

pub struct SecurityEventLogger;

impl SecurityEventLogger {
    /// Record one security event. Free-text fields are redacted first.
    pub fn log_event(mut event: SecurityEvent) -> SecurityLogEntry {
        if let SecurityEvent::CeremonyRejected { reason, .. } = &mut event {
            *reason = redact_sensitive_data(reason);
        }

        let entry = SecurityLogEntry {
            timestamp: Utc::now(),
            event,
        };
        let payload = serde_json::to_string(&entry.event).unwrap_or_default();
        warn!(target: SECURITY_TARGET, event = %payload, "Security event");
        entry
    }
}
