//! Device registry: paired laptops, their pairing secrets and live control connections.
//!
//! A device is created by `pair`, never deleted, and holds at most one connection
//! handle at a time (last writer wins).

use chrono::{DateTime, Utc};
use latchkey_core::{ConnectionHandle, DeviceId, LatchkeyError};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::hmac_auth::HmacVerifier;
use crate::secrets::{generate_device_id, generate_secret};

const DEFAULT_DEVICE_NAME: &str = "laptop";

#[derive(Debug)]
struct Device {
    name: String,
    secret: String,
    paired_at: DateTime<Utc>,
    connection: Option<ConnectionHandle>,
}

/// The only place a pairing secret is ever handed out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingGrant {
    pub device_id: DeviceId,
    pub secret: String,
}

/// Public view of a device; never carries the secret.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub name: String,
    pub paired_at: DateTime<Utc>,
    pub connected: bool,
}

#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<DeviceId, Device>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a new device with a fresh secret and no connection.
    pub async fn pair(&self, name: Option<&str>) -> PairingGrant {
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_DEVICE_NAME)
            .to_string();
        let secret = generate_secret();

        let mut devices = self.devices.write().await;
        let mut device_id = generate_device_id();
        while devices.contains_key(&device_id) {
            device_id = generate_device_id();
        }
        devices.insert(
            device_id.clone(),
            Device {
                name: name.clone(),
                secret: secret.clone(),
                paired_at: Utc::now(),
                connection: None,
            },
        );
        info!(device_id = %device_id, name = %name, "Device paired");

        PairingGrant { device_id, secret }
    }

    pub async fn contains(&self, device_id: &DeviceId) -> bool {
        self.devices.read().await.contains_key(device_id)
    }

    pub async fn lookup(&self, device_id: &DeviceId) -> Result<DeviceInfo, LatchkeyError> {
        let devices = self.devices.read().await;
        let device = devices
            .get(device_id)
            .ok_or_else(|| LatchkeyError::UnknownDevice(device_id.to_string()))?;
        Ok(DeviceInfo {
            device_id: device_id.clone(),
            name: device.name.clone(),
            paired_at: device.paired_at,
            connected: device.connection.as_ref().is_some_and(ConnectionHandle::is_open),
        })
    }

    /// Check an HMAC proof against the device's secret.
    ///
    /// Unknown devices yield `UnknownDevice`; every other failure is `AuthenticationFailed`.
    pub async fn verify_proof(
        &self,
        verifier: &HmacVerifier,
        device_id: &DeviceId,
        timestamp: i64,
        signature: &str,
        now_ms: i64,
    ) -> Result<(), LatchkeyError> {
        let secret = {
            let devices = self.devices.read().await;
            devices
                .get(device_id)
                .map(|d| d.secret.clone())
                .ok_or_else(|| LatchkeyError::UnknownDevice(device_id.to_string()))?
        };
        verifier.verify(&secret, device_id, timestamp, signature, now_ms)
    }

    /// Attach a connection, returning the handle it displaced (if any).
    pub async fn bind_connection(
        &self,
        device_id: &DeviceId,
        handle: ConnectionHandle,
    ) -> Result<Option<ConnectionHandle>, LatchkeyError> {
        let mut devices = self.devices.write().await;
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| LatchkeyError::UnknownDevice(device_id.to_string()))?;
        let displaced = device
            .connection
            .replace(handle)
            .filter(|prev| prev.is_open());
        if let Some(prev) = &displaced {
            warn!(device_id = %device_id, connection = %prev.id(), "Displacing previous connection");
        }
        Ok(displaced)
    }

    /// Detach the connection, but only if it is still the one identified by `connection_id`.
    pub async fn unbind_connection(&self, device_id: &DeviceId, connection_id: Uuid) -> bool {
        let mut devices = self.devices.write().await;
        match devices.get_mut(device_id) {
            Some(device) if device.connection.as_ref().map(ConnectionHandle::id) == Some(connection_id) => {
                device.connection = None;
                true
            }
            _ => false,
        }
    }

    /// The live connection for a device, if one is bound and still open.
    pub async fn connection(&self, device_id: &DeviceId) -> Result<Option<ConnectionHandle>, LatchkeyError> {
        let devices = self.devices.read().await;
        let device = devices
            .get(device_id)
            .ok_or_else(|| LatchkeyError::UnknownDevice(device_id.to_string()))?;
        Ok(device.connection.clone().filter(ConnectionHandle::is_open))
    }

    pub async fn len(&self) -> usize {
        self.devices.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.devices.read().await.is_empty()
    }

    pub async fn connected_count(&self) -> usize {
        self.devices
            .read()
            .await
            .values()
            .filter(|d| d.connection.as_ref().is_some_and(ConnectionHandle::is_open))
            .count()
    }
}
