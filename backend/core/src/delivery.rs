//! Outcome of one unlock delivery attempt.

use serde::Serialize;

use crate::types::DeviceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Pushed to the device's live connection.
    Sent,
    /// Stored as a pending-unlock token until the device reconnects.
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    pub device_id: DeviceId,
    pub status: DeliveryStatus,
    /// Present only for queued deliveries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl DeliveryReport {
    pub fn sent(device_id: DeviceId) -> Self {
        Self { device_id, status: DeliveryStatus::Sent, token: None }
    }

    pub fn queued(device_id: DeviceId, token: String) -> Self {
        Self { device_id, status: DeliveryStatus::Queued, token: Some(token) }
    }

    /// Human-readable summary returned to the mobile client.
    pub fn message(&self) -> String {
        match self.status {
            DeliveryStatus::Sent => format!("Unlock signal sent to device {}", self.device_id),
            DeliveryStatus::Queued => format!(
                "Device {} is offline; unlock queued until it reconnects",
                self.device_id
            ),
        }
    }
}
