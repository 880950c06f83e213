//! `POST /pair`: mint a device and hand out its secret, once.

use axum::{body::Bytes, extract::State, Json};
use latchkey_core::LatchkeyError;
use latchkey_security::PairingGrant;
use serde::Deserialize;

use crate::error::ApiResult;
use crate::server::GatewayState;

#[derive(Debug, Default, Deserialize)]
pub struct PairRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// The body is optional; an empty request pairs a device with the default name.
pub async fn pair(State(state): State<GatewayState>, body: Bytes) -> ApiResult<Json<PairingGrant>> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        PairRequest::default()
    } else {
        serde_json::from_slice::<PairRequest>(&body)
            .map_err(|e| LatchkeyError::invalid_input(format!("invalid pairing request: {e}")))?
    };

    let grant = state.devices.pair(request.name.as_deref()).await;
    Ok(Json(grant))
}
