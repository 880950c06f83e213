//! HMAC-SHA256 proof that a caller holds a device's pairing secret.
//!
//! The signed message is `deviceId || timestamp` where the timestamp is the decimal
//! millisecond Unix time; the signature travels as lowercase hex.

use hmac::{Hmac, Mac};
use latchkey_core::{DeviceId, LatchkeyError};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Maximum clock skew accepted between signer and verifier.
pub const DEFAULT_WINDOW_MS: i64 = 30_000;

pub fn signing_message(device_id: &DeviceId, timestamp: i64) -> String {
    format!("{device_id}{timestamp}")
}

fn keyed_mac(secret: &str, device_id: &DeviceId, timestamp: i64) -> Result<HmacSha256, LatchkeyError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| LatchkeyError::Internal(anyhow::anyhow!("hmac key rejected: {e}")))?;
    mac.update(signing_message(device_id, timestamp).as_bytes());
    Ok(mac)
}

/// Compute the hex signature a device sends with `AUTH` or `/unlock`.
pub fn sign(secret: &str, device_id: &DeviceId, timestamp: i64) -> Result<String, LatchkeyError> {
    let mac = keyed_mac(secret, device_id, timestamp)?;
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time signature check, ignoring freshness.
pub fn verify_signature(secret: &str, device_id: &DeviceId, timestamp: i64, signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    match keyed_mac(secret, device_id, timestamp) {
        Ok(mac) => mac.verify_slice(&provided).is_ok(),
        Err(_) => false,
    }
}

/// Stateless verifier combining signature and freshness checks.
#[derive(Debug, Clone, Copy)]
pub struct HmacVerifier {
    window_ms: i64,
}

impl Default for HmacVerifier {
    fn default() -> Self {
        Self { window_ms: DEFAULT_WINDOW_MS }
    }
}

impl HmacVerifier {
    pub fn new(window_ms: i64) -> Self {
        Self { window_ms }
    }

    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Fails with a generic `AuthenticationFailed` on a bad signature or a stale timestamp.
    pub fn verify(
        &self,
        secret: &str,
        device_id: &DeviceId,
        timestamp: i64,
        signature: &str,
        now_ms: i64,
    ) -> Result<(), LatchkeyError> {
        if !verify_signature(secret, device_id, timestamp, signature) {
            debug!(device_id = %device_id, "HMAC signature mismatch");
            return Err(LatchkeyError::AuthenticationFailed);
        }
        let skew = now_ms.saturating_sub(timestamp).saturating_abs();
        if skew > self.window_ms {
            debug!(device_id = %device_id, skew_ms = skew, "HMAC timestamp outside window");
            return Err(LatchkeyError::AuthenticationFailed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "3f1c0a9be2d4";
    const NOW: i64 = 1_700_000_000_000;

    fn device() -> DeviceId {
        DeviceId::new("dev-1")
    }

    #[test]
    fn sign_then_verify_succeeds() {
        let sig = sign(SECRET, &device(), NOW).unwrap();
        assert_eq!(sig.len(), 64);
        HmacVerifier::default().verify(SECRET, &device(), NOW, &sig, NOW).unwrap();
    }

    #[test]
    fn matches_laptop_client_signature() {
        // Same construction the laptop agent has always used: hex(HMAC(secret, id + ts)).
        let sig = sign("key", &device(), NOW).unwrap();
        assert_eq!(
            sig,
            "37d8a88cd2592d0db3269cc870090f3b1cc3c6dcc255d05ae57eae43a6780c02"
        );
        assert_eq!(signing_message(&device(), NOW), "dev-11700000000000");
    }

    #[test]
    fn any_single_bit_flip_fails() {
        let sig = sign(SECRET, &device(), NOW).unwrap();
        let bytes = hex::decode(&sig).unwrap();
        let verifier = HmacVerifier::default();
        for byte in 0..bytes.len() {
            for bit in 0..8 {
                let mut flipped = bytes.clone();
                flipped[byte] ^= 1 << bit;
                let result = verifier.verify(SECRET, &device(), NOW, &hex::encode(&flipped), NOW);
                assert!(matches!(result, Err(LatchkeyError::AuthenticationFailed)));
            }
        }
    }

    #[test]
    fn stale_and_future_timestamps_fail() {
        let verifier = HmacVerifier::default();
        for ts in [NOW - 30_001, NOW + 30_001, NOW - 3_600_000] {
            let sig = sign(SECRET, &device(), ts).unwrap();
            assert!(verifier.verify(SECRET, &device(), ts, &sig, NOW).is_err());
        }
        for ts in [NOW - 30_000, NOW + 30_000] {
            let sig = sign(SECRET, &device(), ts).unwrap();
            assert!(verifier.verify(SECRET, &device(), ts, &sig, NOW).is_ok());
        }
    }

    #[test]
    fn wrong_secret_device_or_encoding_fails() {
        let sig = sign(SECRET, &device(), NOW).unwrap();
        let verifier = HmacVerifier::default();
        assert!(verifier.verify("other", &device(), NOW, &sig, NOW).is_err());
        assert!(verifier.verify(SECRET, &DeviceId::new("dev-2"), NOW, &sig, NOW).is_err());
        assert!(verifier.verify(SECRET, &device(), NOW, "zz-not-hex", NOW).is_err());
        assert!(verifier.verify(SECRET, &device(), NOW, "", NOW).is_err());
    }

    #[test]
    fn uppercase_hex_is_accepted() {
        let sig = sign(SECRET, &device(), NOW).unwrap().to_uppercase();
        assert!(verify_signature(SECRET, &device(), NOW, &sig));
    }
}
