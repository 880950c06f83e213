//! Passkey users and their outstanding challenges.
//!
//! Each user has at most one pending challenge. Issuing a new one replaces the old
//! one; completing a ceremony takes it out of the store before verification runs,
//! so a challenge is consumed by the first completion attempt whatever the outcome.

use chrono::{DateTime, Utc};
use latchkey_core::{DeviceId, LatchkeyError, UserId};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use crate::verifier::{check_counter, StoredCredential, VerifyError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passkey {
    pub credential_id: String,
    /// Serialized credential as produced by the verifier.
    pub material: String,
    pub counter: u32,
    pub transports: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Passkey {
    pub fn stored(&self) -> StoredCredential {
        StoredCredential {
            credential_id: self.credential_id.clone(),
            material: self.material.clone(),
            counter: self.counter,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CeremonyKind {
    Registration,
    Authentication,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    /// Serialized ceremony state from the verifier.
    pub state: String,
    pub kind: CeremonyKind,
    pub issued_at: DateTime<Utc>,
    /// Device a registration was requested for. Only becomes the user's home
    /// device once the registration verifies.
    pub device_id: Option<DeviceId>,
}

#[derive(Debug, Clone)]
pub struct PasskeyUser {
    pub passkeys: Vec<Passkey>,
    pub pending: Option<PendingChallenge>,
    /// Device of the last verified registration; the default unlock target.
    pub device_id: Option<DeviceId>,
}

/// Everything an authentication completion needs, captured atomically.
#[derive(Debug, Clone)]
pub struct AuthenticationClaim {
    pub challenge: PendingChallenge,
    pub credential: StoredCredential,
    pub home_device: Option<DeviceId>,
}

#[derive(Debug, Default)]
pub struct UserStore {
    users: Mutex<HashMap<UserId, PasskeyUser>>,
}

impl UserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a registration challenge for `device_id`, creating the user on
    /// first use. The user's home device is left alone.
    pub async fn issue_registration(&self, user_id: &UserId, device_id: &DeviceId, state: String) {
        let mut users = self.users.lock().await;
        let user = users.entry(user_id.clone()).or_insert_with(|| PasskeyUser {
            passkeys: Vec::new(),
            pending: None,
            device_id: None,
        });
        user.pending = Some(PendingChallenge {
            state,
            kind: CeremonyKind::Registration,
            issued_at: Utc::now(),
            device_id: Some(device_id.clone()),
        });
    }

    /// Record an authentication challenge. Users without passkeys get `NoPasskeys`
    /// and keep whatever challenge they had.
    pub async fn issue_authentication(&self, user_id: &UserId, state: String) -> Result<(), LatchkeyError> {
        let mut users = self.users.lock().await;
        let user = users
            .get_mut(user_id)
            .filter(|u| !u.passkeys.is_empty())
            .ok_or(LatchkeyError::NoPasskeys)?;
        user.pending = Some(PendingChallenge {
            state,
            kind: CeremonyKind::Authentication,
            issued_at: Utc::now(),
            device_id: None,
        });
        Ok(())
    }

    /// Remove the user's pending challenge if it belongs to a ceremony of `kind`.
    pub async fn take_challenge(
        &self,
        user_id: &UserId,
        kind: CeremonyKind,
    ) -> Result<PendingChallenge, LatchkeyError> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(user_id).ok_or(LatchkeyError::NoPendingCeremony)?;
        take_matching(user, kind)
    }

    /// Consume the pending authentication challenge and snapshot the credential
    /// being asserted. Both happen under one lock acquisition.
    pub async fn claim_authentication(
        &self,
        user_id: &UserId,
        credential_id: &str,
    ) -> Result<AuthenticationClaim, LatchkeyError> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(user_id).ok_or(LatchkeyError::NoPendingCeremony)?;
        let challenge = take_matching(user, CeremonyKind::Authentication)?;
        let credential = user
            .passkeys
            .iter()
            .find(|p| p.credential_id == credential_id)
            .map(Passkey::stored)
            .ok_or(LatchkeyError::UnknownCredential)?;
        Ok(AuthenticationClaim {
            challenge,
            credential,
            home_device: user.device_id.clone(),
        })
    }

    /// Append a verified passkey and make `device_id` the user's home device.
    /// A credential id already on file is replaced.
    pub async fn add_passkey(
        &self,
        user_id: &UserId,
        passkey: Passkey,
        device_id: &DeviceId,
    ) -> Result<(), LatchkeyError> {
        let mut users = self.users.lock().await;
        let user = users.get_mut(user_id).ok_or(LatchkeyError::NoPendingCeremony)?;
        user.passkeys.retain(|p| p.credential_id != passkey.credential_id);
        user.passkeys.push(passkey);
        user.device_id = Some(device_id.clone());
        Ok(())
    }

    /// Store a new signature counter (and updated material, if any),
    /// re-checking monotonicity against the current value.
    pub async fn commit_counter(
        &self,
        user_id: &UserId,
        credential_id: &str,
        new_counter: u32,
        material: Option<String>,
        allow_counterless: bool,
    ) -> Result<(), VerifyError> {
        let mut users = self.users.lock().await;
        let passkey = users
            .get_mut(user_id)
            .and_then(|u| u.passkeys.iter_mut().find(|p| p.credential_id == credential_id))
            .ok_or_else(|| VerifyError::rejected("credential disappeared during verification"))?;
        check_counter(passkey.counter, new_counter, allow_counterless)?;
        passkey.counter = new_counter;
        if let Some(material) = material {
            passkey.material = material;
        }
        passkey.last_used_at = Some(Utc::now());
        Ok(())
    }

    /// Drop challenges issued more than `max_age` ago. Returns how many were removed.
    pub async fn sweep_challenges(&self, max_age: Duration) -> usize {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(3650));
        let cutoff = Utc::now() - max_age;
        let mut users = self.users.lock().await;
        let mut removed = 0;
        for (user_id, user) in users.iter_mut() {
            if user.pending.as_ref().is_some_and(|c| c.issued_at < cutoff) {
                user.pending = None;
                removed += 1;
                debug!(user_id = %user_id, "Expired pending challenge");
            }
        }
        removed
    }

    pub async fn passkeys(&self, user_id: &UserId) -> Vec<Passkey> {
        self.users
            .lock()
            .await
            .get(user_id)
            .map(|u| u.passkeys.clone())
            .unwrap_or_default()
    }

    pub async fn stored_credentials(&self, user_id: &UserId) -> Vec<StoredCredential> {
        self.users
            .lock()
            .await
            .get(user_id)
            .map(|u| u.passkeys.iter().map(Passkey::stored).collect())
            .unwrap_or_default()
    }

    pub async fn home_device(&self, user_id: &UserId) -> Option<DeviceId> {
        self.users.lock().await.get(user_id).and_then(|u| u.device_id.clone())
    }

    pub async fn pending(&self, user_id: &UserId) -> Option<PendingChallenge> {
        self.users.lock().await.get(user_id).and_then(|u| u.pending.clone())
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }
}

fn take_matching(user: &mut PasskeyUser, kind: CeremonyKind) -> Result<PendingChallenge, LatchkeyError> {
    match user.pending.take() {
        Some(pending) if pending.kind == kind => Ok(pending),
        other => {
            user.pending = other;
            Err(LatchkeyError::NoPendingCeremony)
        }
    }
}
