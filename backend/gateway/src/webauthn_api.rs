//! Passkey ceremony endpoints under `/webauthn`.

use axum::{extract::State, http::StatusCode, Json};
use latchkey_core::{DeliveryStatus, DeviceId, LatchkeyError, UserId};
use latchkey_passkey::{CreationOptions, RequestOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ApiError, ApiResult};
use crate::extract::{ApiJson, RequestOrigin};
use crate::server::GatewayState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOptionsRequest {
    pub user_id: UserId,
    pub device_id: DeviceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterVerifyRequest {
    pub user_id: UserId,
    pub credential: Value,
}

#[derive(Debug, Serialize)]
pub struct RegisterVerifyResponse {
    pub verified: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthOptionsRequest {
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthVerifyRequest {
    pub user_id: UserId,
    pub credential: Value,
    #[serde(default)]
    pub device_id: Option<DeviceId>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnlockResponse {
    pub status: DeliveryStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub device_id: DeviceId,
}

pub async fn register_options(
    State(state): State<GatewayState>,
    RequestOrigin(rp): RequestOrigin,
    ApiJson(req): ApiJson<RegisterOptionsRequest>,
) -> ApiResult<Json<CreationOptions>> {
    let options = state
        .ceremonies
        .begin_registration(&req.user_id, &req.device_id, &rp)
        .await?;
    Ok(Json(options))
}

pub async fn register_verify(
    State(state): State<GatewayState>,
    RequestOrigin(rp): RequestOrigin,
    ApiJson(req): ApiJson<RegisterVerifyRequest>,
) -> ApiResult<Json<RegisterVerifyResponse>> {
    state
        .ceremonies
        .complete_registration(&req.user_id, &req.credential, &rp)
        .await?;
    Ok(Json(RegisterVerifyResponse { verified: true }))
}

pub async fn auth_options(
    State(state): State<GatewayState>,
    RequestOrigin(rp): RequestOrigin,
    ApiJson(req): ApiJson<AuthOptionsRequest>,
) -> ApiResult<Json<RequestOptions>> {
    let options = state.ceremonies.begin_authentication(&req.user_id, &rp).await?;
    Ok(Json(options))
}

pub async fn auth_verify(
    State(state): State<GatewayState>,
    RequestOrigin(rp): RequestOrigin,
    ApiJson(req): ApiJson<AuthVerifyRequest>,
) -> ApiResult<Json<UnlockResponse>> {
    let unlocked = state
        .ceremonies
        .complete_authentication(&req.user_id, &req.credential, req.device_id.as_ref(), &rp)
        .await
        .map_err(|e| match e {
            LatchkeyError::CeremonyRejected => ApiError::from(e).with_status(StatusCode::UNAUTHORIZED),
            other => ApiError::from(other),
        })?;

    let delivery = unlocked.delivery;
    Ok(Json(UnlockResponse {
        status: delivery.status,
        message: delivery.message(),
        token: delivery.token.clone(),
        device_id: delivery.device_id,
    }))
}
