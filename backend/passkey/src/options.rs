//! Option documents handed to `navigator.credentials.create()` / `.get()`.
//!
//! These are the verifier's `publicKey` documents, passed through untouched so
//! the browser sees exactly what the verifier will check against.

use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(transparent)]
pub struct CreationOptions(pub Value);

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(transparent)]
pub struct RequestOptions(pub Value);

impl CreationOptions {
    pub fn challenge(&self) -> Option<&str> {
        self.0["challenge"].as_str()
    }

    /// Ids listed under `excludeCredentials`.
    pub fn excluded_ids(&self) -> Vec<&str> {
        credential_ids(&self.0["excludeCredentials"])
    }
}

impl RequestOptions {
    pub fn challenge(&self) -> Option<&str> {
        self.0["challenge"].as_str()
    }

    /// Ids listed under `allowCredentials`.
    pub fn allowed_ids(&self) -> Vec<&str> {
        credential_ids(&self.0["allowCredentials"])
    }
}

fn credential_ids(list: &Value) -> Vec<&str> {
    list.as_array()
        .map(|items| items.iter().filter_map(|d| d["id"].as_str()).collect())
        .unwrap_or_default()
}
