//! The WebAuthn capability the ceremony orchestrator delegates to.
//!
//! A verifier both starts ceremonies (producing the options document and an
//! opaque serialized state) and finishes them against that state. The
//! orchestrator only stores the state and the credential material; it never
//! depends on the field layout of any particular WebAuthn library.

use latchkey_core::UserId;
use serde_json::Value;
use thiserror::Error;

use crate::response::{AuthenticationCredential, RegistrationCredential};

/// The relying party a ceremony is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelyingParty {
    /// Effective domain, e.g. `unlock.example.com`.
    pub id: String,
    /// Full origin including scheme, e.g. `https://unlock.example.com`.
    pub origin: String,
    /// Display name shown by the authenticator.
    pub name: String,
}

impl RelyingParty {
    pub fn new(id: impl Into<String>, origin: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            origin: origin.into(),
            name: name.into(),
        }
    }
}

/// A started ceremony: the `publicKey` options for the browser and the state
/// needed to finish it.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub options: Value,
    pub state: String,
}

/// A stored credential as the verifier needs to see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub credential_id: String,
    /// Serialized credential produced by the verifier at registration.
    pub material: String,
    pub counter: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedRegistration {
    pub credential_id: String,
    pub material: String,
    pub counter: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedAuthentication {
    pub credential_id: String,
    pub new_counter: u32,
    /// Replacement material when the verifier updated the credential.
    pub material: Option<String>,
}

/// Why a verifier refused a response. The detail is for logs only; clients get
/// a generic rejection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("{0}")]
    Rejected(String),

    #[error("signature counter did not advance (stored {stored}, presented {presented})")]
    CounterRegression { stored: u32, presented: u32 },
}

impl VerifyError {
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}

/// Starts and finishes WebAuthn ceremonies for a relying party.
///
/// The finish calls may be CPU bound; the orchestrator runs them from a
/// blocking task and never while holding the challenge store lock.
pub trait CeremonyVerifier: Send + Sync + 'static {
    fn start_registration(
        &self,
        relying_party: &RelyingParty,
        user_id: &UserId,
        exclude: &[StoredCredential],
    ) -> Result<IssuedChallenge, VerifyError>;

    fn finish_registration(
        &self,
        relying_party: &RelyingParty,
        state: &str,
        credential: &RegistrationCredential,
    ) -> Result<VerifiedRegistration, VerifyError>;

    fn start_authentication(
        &self,
        relying_party: &RelyingParty,
        credentials: &[StoredCredential],
    ) -> Result<IssuedChallenge, VerifyError>;

    fn finish_authentication(
        &self,
        relying_party: &RelyingParty,
        state: &str,
        credential: &AuthenticationCredential,
        stored: &StoredCredential,
    ) -> Result<VerifiedAuthentication, VerifyError>;
}

/// A presented counter must exceed the stored one. With `allow_counterless`,
/// an authenticator that has never reported a counter (both zero) passes too.
pub fn check_counter(stored: u32, presented: u32, allow_counterless: bool) -> Result<(), VerifyError> {
    if presented > stored || (allow_counterless && stored == 0 && presented == 0) {
        Ok(())
    } else {
        Err(VerifyError::CounterRegression { stored, presented })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_must_advance() {
        assert!(check_counter(5, 6, false).is_ok());
        assert_eq!(
            check_counter(5, 5, false),
            Err(VerifyError::CounterRegression { stored: 5, presented: 5 })
        );
        assert!(check_counter(5, 4, false).is_err());
        assert!(check_counter(5, 5, true).is_err());
    }

    #[test]
    fn zero_counters_are_rejected_by_default() {
        assert_eq!(
            check_counter(0, 0, false),
            Err(VerifyError::CounterRegression { stored: 0, presented: 0 })
        );
        assert!(check_counter(0, 1, false).is_ok());
        assert!(check_counter(3, 0, false).is_err());
    }

    #[test]
    fn counterless_authenticators_need_opt_in() {
        assert!(check_counter(0, 0, true).is_ok());
        assert!(check_counter(3, 0, true).is_err());
    }
}
