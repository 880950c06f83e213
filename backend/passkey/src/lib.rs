//! Passkey (WebAuthn) ceremonies for latchkey.
//!
//! [`CeremonyOrchestrator`] owns the per-user challenge store and passkey table.
//! Starting and verifying ceremonies is delegated to a [`CeremonyVerifier`];
//! [`WebauthnVerifier`] is the `webauthn-rs` implementation.

pub mod ceremony;
pub mod encoding;
pub mod options;
pub mod response;
pub mod users;
pub mod verifier;
pub mod webauthn;

pub use ceremony::{
    AuthenticatedUnlock, CeremonyOrchestrator, CeremonySettings, RegisteredPasskey, UnlockDelivery,
    DEFAULT_CEREMONY_TIMEOUT,
};
pub use options::{CreationOptions, RequestOptions};
pub use response::{AuthenticationCredential, RegistrationCredential};
pub use users::{Passkey, UserStore};
pub use verifier::{
    CeremonyVerifier, IssuedChallenge, RelyingParty, StoredCredential, VerifiedAuthentication,
    VerifiedRegistration, VerifyError,
};
pub use webauthn::WebauthnVerifier;
