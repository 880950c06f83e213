//! Device trust primitives: secret generation, HMAC proof-of-possession, and the
//! registry of paired laptops.

pub mod hmac_auth;
pub mod registry;
pub mod secrets;

pub use hmac_auth::{sign, signing_message, verify_signature, HmacVerifier, DEFAULT_WINDOW_MS};
pub use registry::{DeviceInfo, DeviceRegistry, PairingGrant};
pub use secrets::{generate_device_id, generate_secret, generate_unlock_token, SECRET_BYTES};
