//! Session Manager.
//!
//! Owns the binding between paired devices and their live control connections,
//! and is the only path an `UNLOCK` takes to reach a laptop.
//!
//! Binding a connection (and draining its queue) and delivering an unlock both
//! run under `delivery_lock`, so a token is either pushed to a live connection or
//! queued where the next successful `AUTH` will find it, never stranded in between.

use async_trait::async_trait;
use latchkey_core::{
    now_millis, ConnectionHandle, DeliveryReport, DeviceId, LatchkeyError, ServerMessage,
};
use latchkey_logging::{SecurityEvent, SecurityEventLogger};
use latchkey_passkey::UnlockDelivery;
use latchkey_security::{DeviceRegistry, HmacVerifier};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::unlock_queue::PendingUnlockQueue;

pub const DISPLACED_ERROR: &str = "connection_displaced";

pub struct SessionManager {
    devices: Arc<DeviceRegistry>,
    queue: Arc<PendingUnlockQueue>,
    hmac: HmacVerifier,
    passkey_ttl: Duration,
    delivery_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        devices: Arc<DeviceRegistry>,
        queue: Arc<PendingUnlockQueue>,
        hmac: HmacVerifier,
        passkey_ttl: Duration,
    ) -> Self {
        Self {
            devices,
            queue,
            hmac,
            passkey_ttl,
            delivery_lock: Mutex::new(()),
        }
    }

    pub fn hmac(&self) -> &HmacVerifier {
        &self.hmac
    }

    /// Check an HMAC proof, emitting a security event when it is rejected.
    pub async fn verify_proof(
        &self,
        device_id: &DeviceId,
        timestamp: i64,
        signature: &str,
        channel: &str,
    ) -> Result<(), LatchkeyError> {
        let result = self
            .devices
            .verify_proof(&self.hmac, device_id, timestamp, signature, now_millis())
            .await;
        if let Err(LatchkeyError::AuthenticationFailed) = &result {
            SecurityEventLogger::log_event(SecurityEvent::HmacRejected {
                device_id: device_id.to_string(),
                channel: channel.to_string(),
            });
        }
        result
    }

    /// Handle an `AUTH` on `handle`: verify, bind (displacing any previous
    /// connection), acknowledge and flush queued unlocks.
    pub async fn authenticate(
        &self,
        handle: &ConnectionHandle,
        device_id: &DeviceId,
        timestamp: i64,
        signature: &str,
    ) -> Result<(), LatchkeyError> {
        self.verify_proof(device_id, timestamp, signature, "control").await?;

        let _guard = self.delivery_lock.lock().await;
        if let Some(previous) = self.devices.bind_connection(device_id, handle.clone()).await? {
            SecurityEventLogger::log_event(SecurityEvent::DeviceDisplaced {
                device_id: device_id.to_string(),
            });
            previous.push(ServerMessage::error(DISPLACED_ERROR));
            previous.close();
        }

        handle.push(ServerMessage::AuthOk {
            device_id: device_id.clone(),
        });
        info!(device_id = %device_id, connection = %handle.id(), "Device authenticated");

        let queued = self.queue.take_for_device(device_id).await;
        let mut flushed = 0usize;
        for item in queued {
            let token = item.token.clone();
            if handle.push(ServerMessage::Unlock {
                token: Some(token.clone()),
            }) {
                self.queue.mark_delivered(&token).await;
                flushed += 1;
            } else {
                self.queue.restore(item).await;
            }
        }
        if flushed > 0 {
            info!(device_id = %device_id, count = flushed, "Delivered queued unlocks");
        }
        Ok(())
    }

    /// Clear the device's binding if it still points at this connection.
    pub async fn disconnect(&self, device_id: &DeviceId, connection_id: Uuid) {
        if self.devices.unbind_connection(device_id, connection_id).await {
            debug!(device_id = %device_id, connection = %connection_id, "Connection unbound");
        }
    }

    /// Push an `UNLOCK` to the device's live connection, or queue a token valid
    /// for `ttl`. Exactly one of the two happens.
    pub async fn deliver_unlock_with_ttl(
        &self,
        device_id: &DeviceId,
        ttl: Duration,
    ) -> Result<DeliveryReport, LatchkeyError> {
        let _guard = self.delivery_lock.lock().await;
        if let Some(handle) = self.devices.connection(device_id).await? {
            if handle.push(ServerMessage::Unlock { token: None }) {
                info!(device_id = %device_id, "Unlock pushed to live connection");
                return Ok(DeliveryReport::sent(device_id.clone()));
            }
        }

        let token = self.queue.enqueue(device_id, ttl).await;
        info!(device_id = %device_id, "Device offline, unlock queued");
        Ok(DeliveryReport::queued(device_id.clone(), token))
    }
}

#[async_trait]
impl UnlockDelivery for SessionManager {
    async fn deliver_unlock(&self, device_id: &DeviceId) -> Result<DeliveryReport, LatchkeyError> {
        self.deliver_unlock_with_ttl(device_id, self.passkey_ttl).await
    }
}
