//! Control-connection protocol between the service and a laptop agent.
//!
//! Frames are JSON objects tagged by `type`. The decoder is strict: anything that
//! is not a well-formed `AUTH` or `PING` is a [`LatchkeyError::MalformedControlMessage`].

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

use crate::error::LatchkeyError;
use crate::types::DeviceId;

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Proof of possession of the pairing secret.
    Auth {
        #[serde(rename = "deviceId")]
        device_id: DeviceId,
        signature: String,
        /// Milliseconds since the Unix epoch.
        timestamp: i64,
    },
    /// Keep-alive, only answered once authenticated.
    Ping,
}

impl ClientMessage {
    pub fn parse(text: &str) -> Result<Self, LatchkeyError> {
        serde_json::from_str(text).map_err(|e| LatchkeyError::MalformedControlMessage(e.to_string()))
    }
}

/// Server -> client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    AuthOk {
        #[serde(rename = "deviceId")]
        device_id: DeviceId,
    },
    Error {
        error: String,
    },
    Unlock {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },
    Pong,
}

impl ServerMessage {
    pub fn error(code: impl Into<String>) -> Self {
        Self::Error { error: code.into() }
    }
}

/// Back-reference to one live control connection.
///
/// Owned by the connection task; the device registry only keeps a clone so it can
/// push messages. Dropping the receiver side closes the handle.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::UnboundedSender<ServerMessage>,
    closing: Arc<AtomicBool>,
    close_signal: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiver the connection task drains into its socket.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            tx,
            closing: Arc::new(AtomicBool::new(false)),
            close_signal: Arc::new(Notify::new()),
        };
        (handle, rx)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_open(&self) -> bool {
        !self.closing.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a message for the socket. Returns false once the connection is gone.
    pub fn push(&self, msg: ServerMessage) -> bool {
        self.is_open() && self.tx.send(msg).is_ok()
    }

    /// Ask the owning connection task to shut the socket down.
    pub fn close(&self) {
        self.closing.store(true, Ordering::Release);
        self.close_signal.notify_one();
    }

    /// Resolves once [`close`](Self::close) has been called on any clone.
    pub async fn closed(&self) {
        if self.closing.load(Ordering::Acquire) {
            return;
        }
        self.close_signal.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_auth() {
        let msg = ClientMessage::parse(
            r#"{"type":"AUTH","deviceId":"d1","signature":"ab","timestamp":1700000000000}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Auth {
                device_id: DeviceId::new("d1"),
                signature: "ab".into(),
                timestamp: 1_700_000_000_000,
            }
        );
    }

    #[test]
    fn parses_ping_with_empty_body() {
        assert_eq!(ClientMessage::parse(r#"{"type":"PING"}"#).unwrap(), ClientMessage::Ping);
    }

    #[test]
    fn rejects_unknown_and_partial_messages() {
        for raw in [
            "not json",
            r#"{"type":"UNLOCK"}"#,
            r#"{"type":"AUTH","deviceId":"d1"}"#,
            r#"{"deviceId":"d1","signature":"x","timestamp":1}"#,
        ] {
            let err = ClientMessage::parse(raw).unwrap_err();
            assert_eq!(err.code(), "malformed_control_message", "input: {raw}");
        }
    }

    #[test]
    fn server_messages_use_wire_names() {
        let ok = serde_json::to_value(ServerMessage::AuthOk { device_id: "d1".into() }).unwrap();
        assert_eq!(ok, serde_json::json!({"type": "AUTH_OK", "deviceId": "d1"}));

        let unlock = serde_json::to_value(ServerMessage::Unlock { token: None }).unwrap();
        assert_eq!(unlock, serde_json::json!({"type": "UNLOCK"}));

        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong, serde_json::json!({"type": "PONG"}));
    }

    #[tokio::test]
    async fn handle_reports_closed_after_receiver_drop() {
        let (handle, rx) = ConnectionHandle::channel();
        assert!(handle.is_open());
        assert!(handle.push(ServerMessage::Pong));
        drop(rx);
        assert!(!handle.is_open());
        assert!(!handle.push(ServerMessage::Pong));
    }

    #[tokio::test]
    async fn close_is_seen_by_every_clone() {
        let (handle, _rx) = ConnectionHandle::channel();
        let registry_copy = handle.clone();
        registry_copy.close();
        assert!(!handle.is_open());
        assert!(!handle.push(ServerMessage::Pong));
        tokio::time::timeout(std::time::Duration::from_secs(1), handle.closed())
            .await
            .expect("closed() resolves after close()");
    }
}
