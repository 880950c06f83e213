//! Credential JSON as sent by the mobile client, normalised across browser helper
//! versions.
//!
//! Known skew between helper releases:
//! - `clientDataJSON` spelled `clientDataJson`
//! - `rawId` omitted, or `id` omitted in favour of `rawId`
//! - transports reported at the top level instead of under `response`
//! - binary fields sent padded or in the standard base64 alphabet
//!
//! Everything is reconciled into one shape with canonical base64url fields, and
//! [`RegistrationCredential::to_webauthn_json`] /
//! [`AuthenticationCredential::to_webauthn_json`] rebuild the exact document
//! `webauthn-rs` deserialises.

use latchkey_core::LatchkeyError;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::encoding::{b64url, canonical_id, decode_lenient};

const PUBLIC_KEY: &str = "public-key";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCredential<R> {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    raw_id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    response: R,
    #[serde(default)]
    transports: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAttestation {
    #[serde(rename = "clientDataJSON", alias = "clientDataJson")]
    client_data_json: String,
    #[serde(default)]
    attestation_object: Option<String>,
    #[serde(default)]
    transports: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAssertion {
    #[serde(rename = "clientDataJSON", alias = "clientDataJson")]
    client_data_json: String,
    authenticator_data: String,
    signature: String,
    #[serde(default)]
    user_handle: Option<String>,
}

/// Normalised registration (attestation) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationCredential {
    /// Canonical base64url credential id.
    pub id: String,
    pub client_data_json: String,
    pub attestation_object: String,
    pub transports: Vec<String>,
}

/// Normalised authentication (assertion) response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticationCredential {
    /// Canonical base64url credential id.
    pub id: String,
    pub client_data_json: String,
    pub authenticator_data: String,
    pub signature: String,
    pub user_handle: Option<String>,
}

fn parse<R: for<'de> Deserialize<'de>>(value: &Value) -> Result<(RawCredential<R>, String), LatchkeyError> {
    let raw: RawCredential<R> = serde_json::from_value(value.clone())
        .map_err(|e| LatchkeyError::invalid_input(format!("malformed credential: {e}")))?;
    if let Some(kind) = raw.kind.as_deref() {
        if kind != PUBLIC_KEY {
            return Err(LatchkeyError::invalid_input(format!("unsupported credential type '{kind}'")));
        }
    }
    let id = raw
        .raw_id
        .as_deref()
        .or(raw.id.as_deref())
        .filter(|id| !id.trim().is_empty())
        .map(canonical_id)
        .ok_or_else(|| LatchkeyError::invalid_input("credential id is missing"))?;
    Ok((raw, id))
}

/// Re-encode a binary field as unpadded base64url.
fn binary(field: &str, value: &str) -> Result<String, LatchkeyError> {
    decode_lenient(value)
        .map(b64url)
        .ok_or_else(|| LatchkeyError::invalid_input(format!("{field} is not base64")))
}

impl RegistrationCredential {
    pub fn from_json(value: &Value) -> Result<Self, LatchkeyError> {
        let (raw, id) = parse::<RawAttestation>(value)?;
        let attestation_object = raw
            .response
            .attestation_object
            .as_deref()
            .ok_or_else(|| LatchkeyError::invalid_input("attestationObject is missing"))?;

        let mut transports = raw.response.transports;
        if transports.is_empty() {
            transports = raw.transports;
        }
        transports.sort();
        transports.dedup();

        Ok(Self {
            client_data_json: binary("clientDataJSON", &raw.response.client_data_json)?,
            attestation_object: binary("attestationObject", attestation_object)?,
            id,
            transports,
        })
    }

    /// The `RegisterPublicKeyCredential` document. Transports are kept out of
    /// it; they are advisory and stored alongside the passkey instead.
    pub fn to_webauthn_json(&self) -> Value {
        json!({
            "id": self.id,
            "rawId": self.id,
            "type": PUBLIC_KEY,
            "response": {
                "clientDataJSON": self.client_data_json,
                "attestationObject": self.attestation_object,
            },
            "extensions": {},
        })
    }
}

impl AuthenticationCredential {
    pub fn from_json(value: &Value) -> Result<Self, LatchkeyError> {
        let (raw, id) = parse::<RawAssertion>(value)?;
        let user_handle = match raw.response.user_handle.as_deref() {
            Some(handle) if !handle.is_empty() => Some(binary("userHandle", handle)?),
            _ => None,
        };
        Ok(Self {
            client_data_json: binary("clientDataJSON", &raw.response.client_data_json)?,
            authenticator_data: binary("authenticatorData", &raw.response.authenticator_data)?,
            signature: binary("signature", &raw.response.signature)?,
            user_handle,
            id,
        })
    }

    /// The `PublicKeyCredential` document.
    pub fn to_webauthn_json(&self) -> Value {
        json!({
            "id": self.id,
            "rawId": self.id,
            "type": PUBLIC_KEY,
            "response": {
                "clientDataJSON": self.client_data_json,
                "authenticatorData": self.authenticator_data,
                "signature": self.signature,
                "userHandle": self.user_handle,
            },
            "extensions": {},
        })
    }
}
