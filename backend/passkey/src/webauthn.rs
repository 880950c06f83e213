//! [`CeremonyVerifier`] backed by `webauthn-rs`.
//!
//! The relying party comes from each request, so a `Webauthn` instance is built
//! per call. Ceremony state (`PasskeyRegistration` / `PasskeyAuthentication`)
//! and registered `Passkey`s are kept as JSON strings.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;
use webauthn_rs::prelude::{
    CredentialID, Passkey, PasskeyAuthentication, PasskeyRegistration, PublicKeyCredential,
    RegisterPublicKeyCredential, Url, Webauthn, WebauthnBuilder,
};

use latchkey_core::UserId;

use crate::ceremony::DEFAULT_CEREMONY_TIMEOUT;
use crate::encoding::b64url;
use crate::response::{AuthenticationCredential, RegistrationCredential};
use crate::verifier::{
    CeremonyVerifier, IssuedChallenge, RelyingParty, StoredCredential, VerifiedAuthentication,
    VerifiedRegistration, VerifyError,
};

/// Namespace for deriving stable WebAuthn user handles from latchkey user ids.
const USER_HANDLE_NAMESPACE: Uuid = Uuid::from_u128(0x6c61_7463_686b_6579_8000_0000_0000_0001);

#[derive(Debug, Clone)]
pub struct WebauthnVerifier {
    timeout: Duration,
}

impl Default for WebauthnVerifier {
    fn default() -> Self {
        Self::new(DEFAULT_CEREMONY_TIMEOUT)
    }
}

impl WebauthnVerifier {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn webauthn(&self, relying_party: &RelyingParty) -> Result<Webauthn, VerifyError> {
        let origin = Url::parse(&relying_party.origin).map_err(|e| {
            VerifyError::rejected(format!("origin '{}' is not a URL: {e}", relying_party.origin))
        })?;
        WebauthnBuilder::new(&relying_party.id, &origin)
            .map(|builder| builder.rp_name(&relying_party.name).timeout(self.timeout))
            .and_then(|builder| builder.build())
            .map_err(|e| VerifyError::rejected(format!("relying party '{}' unusable: {e:?}", relying_party.id)))
    }
}

fn user_handle(user_id: &UserId) -> Uuid {
    Uuid::new_v5(&USER_HANDLE_NAMESPACE, user_id.as_str().as_bytes())
}

fn encode<T: Serialize>(what: &str, value: &T) -> Result<String, VerifyError> {
    serde_json::to_string(value).map_err(|e| VerifyError::rejected(format!("cannot store {what}: {e}")))
}

fn decode<T: DeserializeOwned>(what: &str, raw: &str) -> Result<T, VerifyError> {
    serde_json::from_str(raw).map_err(|e| VerifyError::rejected(format!("stored {what} is unreadable: {e}")))
}

fn load_passkeys(credentials: &[StoredCredential]) -> Result<Vec<Passkey>, VerifyError> {
    credentials.iter().map(|c| decode("passkey", &c.material)).collect()
}

/// Counter recorded inside a serialized passkey.
fn material_counter(material: &str) -> u32 {
    serde_json::from_str::<serde_json::Value>(material)
        .ok()
        .and_then(|v| v["cred"]["counter"].as_u64())
        .and_then(|c| u32::try_from(c).ok())
        .unwrap_or(0)
}

impl CeremonyVerifier for WebauthnVerifier {
    fn start_registration(
        &self,
        relying_party: &RelyingParty,
        user_id: &UserId,
        exclude: &[StoredCredential],
    ) -> Result<IssuedChallenge, VerifyError> {
        let webauthn = self.webauthn(relying_party)?;
        let exclude: Vec<CredentialID> = load_passkeys(exclude)?
            .iter()
            .map(|pk| pk.cred_id().clone())
            .collect();
        let (ccr, state) = webauthn
            .start_passkey_registration(
                user_handle(user_id),
                user_id.as_str(),
                user_id.as_str(),
                (!exclude.is_empty()).then_some(exclude),
            )
            .map_err(|e| VerifyError::rejected(format!("cannot start registration: {e:?}")))?;

        Ok(IssuedChallenge {
            options: serde_json::to_value(&ccr.public_key)
                .map_err(|e| VerifyError::rejected(format!("cannot encode options: {e}")))?,
            state: encode("registration state", &state)?,
        })
    }

    fn finish_registration(
        &self,
        relying_party: &RelyingParty,
        state: &str,
        credential: &RegistrationCredential,
    ) -> Result<VerifiedRegistration, VerifyError> {
        let webauthn = self.webauthn(relying_party)?;
        let state: PasskeyRegistration = decode("registration state", state)?;
        let response: RegisterPublicKeyCredential = serde_json::from_value(credential.to_webauthn_json())
            .map_err(|e| VerifyError::rejected(format!("credential unreadable: {e}")))?;

        let passkey = webauthn
            .finish_passkey_registration(&response, &state)
            .map_err(|e| VerifyError::rejected(format!("attestation rejected: {e:?}")))?;

        let credential_id = b64url(passkey.cred_id());
        if credential_id != credential.id {
            return Err(VerifyError::rejected("attested credential id differs from the response id"));
        }
        let material = encode("passkey", &passkey)?;
        Ok(VerifiedRegistration {
            counter: material_counter(&material),
            credential_id,
            material,
        })
    }

    fn start_authentication(
        &self,
        relying_party: &RelyingParty,
        credentials: &[StoredCredential],
    ) -> Result<IssuedChallenge, VerifyError> {
        let webauthn = self.webauthn(relying_party)?;
        let passkeys = load_passkeys(credentials)?;
        let (rcr, state) = webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(|e| VerifyError::rejected(format!("cannot start authentication: {e:?}")))?;

        Ok(IssuedChallenge {
            options: serde_json::to_value(&rcr.public_key)
                .map_err(|e| VerifyError::rejected(format!("cannot encode options: {e}")))?,
            state: encode("authentication state", &state)?,
        })
    }

    fn finish_authentication(
        &self,
        relying_party: &RelyingParty,
        state: &str,
        credential: &AuthenticationCredential,
        stored: &StoredCredential,
    ) -> Result<VerifiedAuthentication, VerifyError> {
        let webauthn = self.webauthn(relying_party)?;
        let state: PasskeyAuthentication = decode("authentication state", state)?;
        let response: PublicKeyCredential = serde_json::from_value(credential.to_webauthn_json())
            .map_err(|e| VerifyError::rejected(format!("credential unreadable: {e}")))?;

        let result = webauthn
            .finish_passkey_authentication(&response, &state)
            .map_err(|e| VerifyError::rejected(format!("assertion rejected: {e:?}")))?;

        let credential_id = b64url(result.cred_id());
        if credential_id != stored.credential_id {
            return Err(VerifyError::rejected("assertion is for a different credential"));
        }
        let mut passkey: Passkey = decode("passkey", &stored.material)?;
        passkey.update_credential(&result);

        Ok(VerifiedAuthentication {
            credential_id,
            new_counter: result.counter(),
            material: Some(encode("passkey", &passkey)?),
        })
    }
}
