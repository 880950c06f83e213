//! HTTP client for a running gateway.

use anyhow::{bail, Context, Result};
use latchkey_core::DeviceId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: String,
    pub devices: usize,
    pub passkey_users: usize,
    pub connected_devices: usize,
    pub pending_unlocks: usize,
    pub uptime_seconds: i64,
    pub timestamp: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pairing {
    pub device_id: DeviceId,
    pub secret: String,
}

#[derive(Serialize)]
struct PairRequest<'a> {
    name: &'a str,
}

pub struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub async fn health(&self) -> Result<Health> {
        let resp = self
            .http
            .get(format!("{}/health", self.base))
            .send()
            .await
            .with_context(|| format!("latchkey is not reachable at {}", self.base))?;
        decode(resp).await
    }

    pub async fn pair(&self, name: Option<&str>) -> Result<Pairing> {
        let mut req = self.http.post(format!("{}/pair", self.base));
        if let Some(name) = name {
            req = req.json(&PairRequest { name });
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("latchkey is not reachable at {}", self.base))?;
        decode(resp).await
    }
}

async fn decode<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let message = body["message"].as_str().unwrap_or("no details");
        bail!("Server answered {status}: {message}");
    }
    resp.json().await.context("Unexpected response body")
}
