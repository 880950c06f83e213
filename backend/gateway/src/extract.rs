//! Request extractors: JSON bodies with the API's error shape, and the relying
//! party derived from the request host.

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRef, FromRequest, FromRequestParts, Request},
    http::{header, request::Parts},
    Json,
};
use latchkey_core::LatchkeyError;
use latchkey_passkey::RelyingParty;
use serde::de::DeserializeOwned;
use std::sync::Arc;

use crate::error::ApiError;
use crate::server::{GatewaySettings, GatewayState};

/// `Json<T>` whose rejections are reported as `invalid_input`.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(LatchkeyError::invalid_input(rejection_text(&rejection)).into()),
        }
    }
}

fn rejection_text(rejection: &JsonRejection) -> String {
    rejection.body_text()
}

/// Relying party for this request: configured values win, otherwise the
/// `Host` header (and `X-Forwarded-Proto`) decide.
pub struct RequestOrigin(pub RelyingParty);

#[async_trait]
impl<S> FromRequestParts<S> for RequestOrigin
where
    S: Send + Sync,
    GatewayState: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = GatewayState::from_ref(state);
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.host());
        let proto = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok());
        relying_party(&state.settings, host, proto)
            .map(Self)
            .map_err(ApiError::from)
    }
}

pub fn relying_party(
    settings: &Arc<GatewaySettings>,
    host: Option<&str>,
    forwarded_proto: Option<&str>,
) -> Result<RelyingParty, LatchkeyError> {
    if let (Some(id), Some(origin)) = (&settings.rp_id, &settings.origin) {
        return Ok(RelyingParty::new(id.clone(), origin.clone(), settings.rp_name.clone()));
    }

    let host = host
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| LatchkeyError::invalid_input("Host header is required"))?;
    let hostname = strip_port(host);
    let scheme = forwarded_proto
        .and_then(|p| p.split(',').next())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(if is_local(hostname) { "http" } else { "https" });

    let id = settings.rp_id.clone().unwrap_or_else(|| hostname.to_string());
    let origin = settings
        .origin
        .clone()
        .unwrap_or_else(|| format!("{scheme}://{host}"));
    Ok(RelyingParty::new(id, origin, settings.rp_name.clone()))
}

fn strip_port(host: &str) -> &str {
    if let Some(rest) = host.strip_prefix('[') {
        // [::1]:8080
        return rest.split(']').next().unwrap_or(rest);
    }
    host.rsplit_once(':')
        .filter(|(_, port)| port.chars().all(|c| c.is_ascii_digit()))
        .map(|(name, _)| name)
        .unwrap_or(host)
}

fn is_local(hostname: &str) -> bool {
    matches!(hostname, "localhost" | "127.0.0.1" | "::1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(rp_id: Option<&str>, origin: Option<&str>) -> Arc<GatewaySettings> {
        Arc::new(GatewaySettings {
            rp_id: rp_id.map(String::from),
            origin: origin.map(String::from),
            ..GatewaySettings::default()
        })
    }

    #[test]
    fn configured_values_win() {
        let rp = relying_party(
            &settings(Some("unlock.example.com"), Some("https://unlock.example.com")),
            Some("10.0.0.5:8080"),
            None,
        )
        .unwrap();
        assert_eq!(rp.id, "unlock.example.com");
        assert_eq!(rp.origin, "https://unlock.example.com");
    }

    #[test]
    fn localhost_defaults_to_http() {
        let rp = relying_party(&settings(None, None), Some("localhost:3000"), None).unwrap();
        assert_eq!(rp.id, "localhost");
        assert_eq!(rp.origin, "http://localhost:3000");
    }

    #[test]
    fn remote_host_defaults_to_https() {
        let rp = relying_party(&settings(None, None), Some("unlock.example.com"), None).unwrap();
        assert_eq!(rp.origin, "https://unlock.example.com");
    }

    #[test]
    fn forwarded_proto_is_honoured() {
        let rp = relying_party(&settings(None, None), Some("localhost:3000"), Some("https, http")).unwrap();
        assert_eq!(rp.origin, "https://localhost:3000");
    }

    #[test]
    fn partial_configuration_fills_the_rest_from_host() {
        let rp = relying_party(&settings(Some("example.com"), None), Some("unlock.example.com"), None).unwrap();
        assert_eq!(rp.id, "example.com");
        assert_eq!(rp.origin, "https://unlock.example.com");
    }

    #[test]
    fn missing_host_is_invalid_input() {
        let err = relying_party(&settings(None, None), None, None).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
    }

    #[test]
    fn ipv6_host_port_is_stripped() {
        assert_eq!(strip_port("[::1]:8080"), "::1");
        assert_eq!(strip_port("example.com"), "example.com");
    }
}
