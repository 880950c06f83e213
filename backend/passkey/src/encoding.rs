//! Base64 helpers. WebAuthn uses unpadded base64url everywhere, but older
//! browser helpers sometimes send padded or standard-alphabet strings.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;

pub fn b64url(bytes: impl AsRef<[u8]>) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode any of the four common base64 flavours.
pub fn decode_lenient(input: &str) -> Option<Vec<u8>> {
    let input = input.trim();
    [URL_SAFE_NO_PAD, URL_SAFE, STANDARD, STANDARD_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(input).ok())
}

/// Re-encode an identifier into canonical unpadded base64url.
///
/// Strings that are not base64 at all are passed through unchanged so that
/// lookups still compare them byte-for-byte.
pub fn canonical_id(input: &str) -> String {
    match decode_lenient(input) {
        Some(bytes) if !bytes.is_empty() => b64url(bytes),
        _ => input.trim().to_string(),
    }
}
