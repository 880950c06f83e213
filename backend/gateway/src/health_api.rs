//! Health API
//!
//! `GET /health`: process liveness plus table sizes.

use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::server::GatewayState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub status: &'static str,
    pub devices: usize,
    pub passkey_users: usize,
    pub connected_devices: usize,
    pub pending_unlocks: usize,
    pub uptime_seconds: i64,
    pub timestamp: DateTime<Utc>,
}

pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthReport> {
    let now = Utc::now();
    Json(HealthReport {
        status: "ok",
        devices: state.devices.len().await,
        passkey_users: state.ceremonies.users().len().await,
        connected_devices: state.devices.connected_count().await,
        pending_unlocks: state.queue.pending_count().await,
        uptime_seconds: (now - state.started_at).num_seconds(),
        timestamp: now,
    })
}
