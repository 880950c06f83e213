//! HMAC-authorized unlock and delivery status lookup.

use axum::{
    extract::{Path, State},
    Json,
};
use latchkey_core::DeviceId;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::extract::ApiJson;
use crate::server::GatewayState;
use crate::unlock_queue::UnlockStatus;
use crate::webauthn_api::UnlockResponse;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockRequest {
    pub device_id: DeviceId,
    pub signature: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct UnlockStatusResponse {
    pub token: String,
    pub status: UnlockStatus,
}

/// `POST /unlock`: the caller proves possession of the device secret.
pub async fn unlock(
    State(state): State<GatewayState>,
    ApiJson(req): ApiJson<UnlockRequest>,
) -> ApiResult<Json<UnlockResponse>> {
    state
        .sessions
        .verify_proof(&req.device_id, req.timestamp, &req.signature, "http")
        .await?;

    let delivery = state
        .sessions
        .deliver_unlock_with_ttl(&req.device_id, state.settings.hmac_token_ttl)
        .await?;
    Ok(Json(UnlockResponse {
        status: delivery.status,
        message: delivery.message(),
        token: delivery.token.clone(),
        device_id: delivery.device_id,
    }))
}

/// `GET /unlock/:token`. Read-only; never consumes the token.
pub async fn unlock_status(
    State(state): State<GatewayState>,
    Path(token): Path<String>,
) -> Json<UnlockStatusResponse> {
    let status = state.queue.status(&token).await;
    Json(UnlockStatusResponse { token, status })
}
