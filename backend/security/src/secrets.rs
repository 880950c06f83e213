//! Random material for pairing secrets, device identifiers and unlock tokens.

use latchkey_core::DeviceId;
use rand::RngCore;
use rand::rngs::OsRng;

/// Pairing secrets carry 256 bits of randomness.
pub const SECRET_BYTES: usize = 32;

/// Unlock tokens only need to be unguessable for their short lifetime.
const TOKEN_BYTES: usize = 24;

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Generate a pairing secret, hex encoded.
pub fn generate_secret() -> String {
    random_hex(SECRET_BYTES)
}

/// Generate a fresh device identifier.
pub fn generate_device_id() -> DeviceId {
    DeviceId::new(uuid::Uuid::new_v4().to_string())
}

/// Generate an opaque pending-unlock token.
pub fn generate_unlock_token() -> String {
    format!("ulk_{}", random_hex(TOKEN_BYTES))
}
