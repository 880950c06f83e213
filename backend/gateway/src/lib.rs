//! Latchkey Gateway
//!
//! HTTP API for pairing, passkey ceremonies and HMAC unlocks, plus the
//! control-connection WebSocket that laptop agents hold open.

pub mod error;
pub mod extract;
pub mod health_api;
pub mod pairing_api;
pub mod server;
pub mod session_manager;
pub mod sweeper;
pub mod unlock_api;
pub mod unlock_queue;
pub mod webauthn_api;
pub mod ws_server;

#[cfg(test)]
mod e2e_tests;

pub use server::{router, serve, start_server, GatewaySettings, GatewayState};
pub use session_manager::SessionManager;
pub use unlock_queue::{PendingUnlockQueue, UnlockStatus};
