//! Passkey ceremony orchestrator.
//!
//! Issues registration and authentication options, hands responses to the
//! configured [`CeremonyVerifier`], stores passkeys and counters, and triggers
//! unlock delivery once an authentication succeeds.
//!
//! Concurrency: the pending challenge is removed from the store before the
//! verifier runs, so of two concurrent completions for one user exactly one
//! proceeds and the other sees `NoPendingCeremony`. The verifier itself runs on
//! the blocking pool, outside any lock.
//!
//! The device named in a registration request is held on the pending challenge
//! and only becomes the user's unlock target once that registration verifies.

use async_trait::async_trait;
use chrono::Utc;
use latchkey_core::{DeliveryReport, DeviceId, LatchkeyError, UserId};
use latchkey_logging::{SecurityEvent, SecurityEventLogger};
use latchkey_security::DeviceRegistry;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::options::{CreationOptions, RequestOptions};
use crate::response::{AuthenticationCredential, RegistrationCredential};
use crate::users::{CeremonyKind, Passkey, PendingChallenge, UserStore};
use crate::verifier::{CeremonyVerifier, RelyingParty, VerifyError};

pub const DEFAULT_CEREMONY_TIMEOUT: Duration = Duration::from_secs(300);

/// Hands an unlock to whatever owns device connections.
#[async_trait]
pub trait UnlockDelivery: Send + Sync {
    async fn deliver_unlock(&self, device_id: &DeviceId) -> Result<DeliveryReport, LatchkeyError>;
}

#[derive(Debug, Clone)]
pub struct CeremonySettings {
    /// How long an issued challenge stays usable.
    pub timeout: Duration,
    /// Accept assertions whose counter stays at zero, for authenticators that
    /// never implement one. Off unless configured.
    pub allow_counterless: bool,
}

impl Default for CeremonySettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_CEREMONY_TIMEOUT,
            allow_counterless: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredPasskey {
    pub user_id: UserId,
    pub credential_id: String,
    pub device_id: DeviceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUnlock {
    pub user_id: UserId,
    pub delivery: DeliveryReport,
}

pub struct CeremonyOrchestrator {
    users: UserStore,
    devices: Arc<DeviceRegistry>,
    verifier: Arc<dyn CeremonyVerifier>,
    delivery: Arc<dyn UnlockDelivery>,
    settings: CeremonySettings,
}

impl CeremonyOrchestrator {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        verifier: Arc<dyn CeremonyVerifier>,
        delivery: Arc<dyn UnlockDelivery>,
        settings: CeremonySettings,
    ) -> Self {
        Self {
            users: UserStore::new(),
            devices,
            verifier,
            delivery,
            settings,
        }
    }

    pub fn users(&self) -> &UserStore {
        &self.users
    }

    pub fn settings(&self) -> &CeremonySettings {
        &self.settings
    }

    pub async fn begin_registration(
        &self,
        user_id: &UserId,
        device_id: &DeviceId,
        relying_party: &RelyingParty,
    ) -> Result<CreationOptions, LatchkeyError> {
        require_user_id(user_id)?;
        if !self.devices.contains(device_id).await {
            return Err(LatchkeyError::InvalidDevice(device_id.to_string()));
        }

        let existing = self.users.stored_credentials(user_id).await;
        let issued = self
            .verifier
            .start_registration(relying_party, user_id, &existing)
            .map_err(cannot_start)?;
        self.users.issue_registration(user_id, device_id, issued.state).await;
        debug!(user_id = %user_id, device_id = %device_id, "Issued registration challenge");

        Ok(CreationOptions(issued.options))
    }

    pub async fn complete_registration(
        &self,
        user_id: &UserId,
        response: &Value,
        relying_party: &RelyingParty,
    ) -> Result<RegisteredPasskey, LatchkeyError> {
        require_user_id(user_id)?;
        let credential = RegistrationCredential::from_json(response)?;
        let credential_id = credential.id.clone();
        let pending = self.users.take_challenge(user_id, CeremonyKind::Registration).await?;
        self.ensure_fresh(&pending)?;
        let device_id = pending.device_id.ok_or(LatchkeyError::NoPendingCeremony)?;

        let transports = credential.transports.clone();
        let state = pending.state;
        let rp = relying_party.clone();
        let verified = self
            .run_verifier(move |v| v.finish_registration(&rp, &state, &credential))
            .await?
            .map_err(|e| reject(user_id, "registration", &credential_id, e))?;

        self.users
            .add_passkey(
                user_id,
                Passkey {
                    credential_id: verified.credential_id.clone(),
                    material: verified.material,
                    counter: verified.counter,
                    transports,
                    created_at: Utc::now(),
                    last_used_at: None,
                },
                &device_id,
            )
            .await?;
        info!(user_id = %user_id, device_id = %device_id, "Passkey registered");

        Ok(RegisteredPasskey {
            user_id: user_id.clone(),
            credential_id: verified.credential_id,
            device_id,
        })
    }

    pub async fn begin_authentication(
        &self,
        user_id: &UserId,
        relying_party: &RelyingParty,
    ) -> Result<RequestOptions, LatchkeyError> {
        require_user_id(user_id)?;
        let credentials = self.users.stored_credentials(user_id).await;
        if credentials.is_empty() {
            return Err(LatchkeyError::NoPasskeys);
        }
        let issued = self
            .verifier
            .start_authentication(relying_party, &credentials)
            .map_err(cannot_start)?;
        self.users.issue_authentication(user_id, issued.state).await?;
        debug!(user_id = %user_id, "Issued authentication challenge");

        Ok(RequestOptions(issued.options))
    }

    /// Verify an assertion and, on success, unlock `target` (or the user's home
    /// device when no target is given).
    pub async fn complete_authentication(
        &self,
        user_id: &UserId,
        response: &Value,
        target: Option<&DeviceId>,
        relying_party: &RelyingParty,
    ) -> Result<AuthenticatedUnlock, LatchkeyError> {
        require_user_id(user_id)?;
        let credential = AuthenticationCredential::from_json(response)?;
        if let Some(target) = target {
            if !self.devices.contains(target).await {
                return Err(LatchkeyError::InvalidDevice(target.to_string()));
            }
        }

        let credential_id = credential.id.clone();
        let claim = self.users.claim_authentication(user_id, &credential_id).await?;
        self.ensure_fresh(&claim.challenge)?;

        let state = claim.challenge.state;
        let stored = claim.credential;
        let rp = relying_party.clone();
        let verified = self
            .run_verifier(move |v| v.finish_authentication(&rp, &state, &credential, &stored))
            .await?
            .map_err(|e| reject(user_id, "authentication", &credential_id, e))?;

        self.users
            .commit_counter(
                user_id,
                &verified.credential_id,
                verified.new_counter,
                verified.material,
                self.settings.allow_counterless,
            )
            .await
            .map_err(|e| reject(user_id, "authentication", &credential_id, e))?;

        let device_id = match target {
            Some(target) => target.clone(),
            None => claim.home_device.ok_or(LatchkeyError::NoPasskeys)?,
        };
        info!(user_id = %user_id, device_id = %device_id, "Passkey authentication succeeded");
        let delivery = self.delivery.deliver_unlock(&device_id).await?;

        Ok(AuthenticatedUnlock {
            user_id: user_id.clone(),
            delivery,
        })
    }

    /// Forget challenges older than the ceremony timeout.
    pub async fn sweep_challenges(&self) -> usize {
        self.users.sweep_challenges(self.settings.timeout).await
    }

    fn ensure_fresh(&self, pending: &PendingChallenge) -> Result<(), LatchkeyError> {
        let age = Utc::now().signed_duration_since(pending.issued_at);
        if age.to_std().is_ok_and(|age| age > self.settings.timeout) {
            return Err(LatchkeyError::NoPendingCeremony);
        }
        Ok(())
    }

    async fn run_verifier<T, F>(&self, f: F) -> Result<Result<T, VerifyError>, LatchkeyError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn CeremonyVerifier) -> Result<T, VerifyError> + Send + 'static,
    {
        let verifier = Arc::clone(&self.verifier);
        tokio::task::spawn_blocking(move || f(verifier.as_ref()))
            .await
            .map_err(|e| LatchkeyError::Internal(anyhow::anyhow!("verifier task failed: {e}")))
    }
}

fn require_user_id(user_id: &UserId) -> Result<(), LatchkeyError> {
    if user_id.as_str().trim().is_empty() {
        return Err(LatchkeyError::invalid_input("userId is required"));
    }
    Ok(())
}

fn cannot_start(err: VerifyError) -> LatchkeyError {
    LatchkeyError::invalid_input(format!("cannot start ceremony: {err}"))
}

/// Log the detailed reason and collapse it into the generic client-facing error.
fn reject(user_id: &UserId, ceremony: &str, credential_id: &str, err: VerifyError) -> LatchkeyError {
    let event = match err {
        VerifyError::CounterRegression { stored, presented } => SecurityEvent::CounterRegression {
            user_id: user_id.to_string(),
            credential_id: credential_id.to_string(),
            stored,
            presented,
        },
        VerifyError::Rejected(reason) => SecurityEvent::CeremonyRejected {
            user_id: user_id.to_string(),
            ceremony: ceremony.to_string(),
            reason: format!("{reason} (credential {credential_id})"),
        },
    };
    SecurityEventLogger::log_event(event);
    LatchkeyError::CeremonyRejected
}
