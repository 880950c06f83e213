//! Latchkey laptop agent.
//!
//! Holds one control connection to the gateway, proves possession of the
//! pairing secret with an HMAC `AUTH`, keeps the link alive with `PING`, and
//! runs the configured unlock action whenever an `UNLOCK` arrives.

pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod unlock;

pub use backoff::Backoff;
pub use client::{AgentClient, SessionEnd, PING_INTERVAL};
pub use config::{AgentConfig, ConfigOverrides, AGENT_CONFIG_FILE};
pub use error::AgentError;
pub use unlock::{CommandUnlock, UnlockAction};
