//! Control-connection WebSocket endpoint (`GET /ws`).
//!
//! Each socket gets a writer task fed by its [`ConnectionHandle`] and an inline
//! read loop. A connection starts unauthenticated; only a successful `AUTH` binds
//! it to a device. Anything that does not parse as a control message ends it.
//!
//! `AUTH` runs on its own task. The read loop can be dropped at any await when the
//! connection is closed from the other side, and a queue flush cut short there
//! would strand tokens that were already taken off the queue.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::SplitStream, stream::StreamExt};
use latchkey_core::{ClientMessage, ConnectionHandle, DeviceId, LatchkeyError, ServerMessage};
use latchkey_logging::redact_sensitive_data;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::GatewayState;

const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: GatewayState) {
    let (mut sender, receiver) = socket.split();
    let (handle, mut rx) = ConnectionHandle::channel();
    let connection_id = handle.id();
    debug!(connection = %connection_id, "Control connection opened");

    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to encode control message");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = sender.send(Message::Close(None)).await;
    });

    let mut bound: Option<DeviceId> = None;
    let writer_done = tokio::select! {
        _ = read_loop(receiver, &handle, &state, &mut bound) => false,
        _ = &mut send_task => true,
        _ = handle.closed() => {
            debug!(connection = %connection_id, "Connection closed by server");
            false
        }
    };

    if let Some(device_id) = &bound {
        state.sessions.disconnect(device_id, connection_id).await;
    }

    // Dropping the last sender lets the writer flush and send a close frame.
    handle.close();
    drop(handle);
    if !writer_done
        && tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut send_task)
            .await
            .is_err()
    {
        send_task.abort();
    }
    info!(connection = %connection_id, device_id = ?bound, "Control connection closed");
}

async fn read_loop(
    mut receiver: SplitStream<WebSocket>,
    handle: &ConnectionHandle,
    state: &GatewayState,
    bound: &mut Option<DeviceId>,
) {
    while let Some(frame) = receiver.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => return,
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Binary(_)) => {
                warn!(connection = %handle.id(), "Binary frame on control connection, closing");
                return;
            }
            Err(e) => {
                debug!(connection = %handle.id(), error = %e, "Control connection read failed");
                return;
            }
        };

        let msg = match ClientMessage::parse(&text) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(
                    connection = %handle.id(),
                    frame = %redact_sensitive_data(&text),
                    error = %e,
                    "Malformed control message, closing"
                );
                return;
            }
        };

        match msg {
            ClientMessage::Auth {
                device_id,
                signature,
                timestamp,
            } => match spawn_authenticate(state, handle, device_id.clone(), timestamp, signature)
                .await
                .unwrap_or_else(|e| Err(LatchkeyError::Internal(anyhow::anyhow!("AUTH task failed: {e}"))))
            {
                Ok(()) => {
                    if let Some(previous) = bound.replace(device_id.clone()) {
                        if previous != device_id {
                            state.sessions.disconnect(&previous, handle.id()).await;
                        }
                    }
                }
                Err(e) => {
                    debug!(connection = %handle.id(), device_id = %device_id, code = e.code(), "AUTH rejected");
                    handle.push(ServerMessage::error(public_code(&e)));
                }
            },
            ClientMessage::Ping => {
                if bound.is_some() {
                    handle.push(ServerMessage::Pong);
                }
            }
        }
    }
}

/// Run `AUTH` for `handle` to completion, whether or not the caller keeps
/// waiting for it.
fn spawn_authenticate(
    state: &GatewayState,
    handle: &ConnectionHandle,
    device_id: DeviceId,
    timestamp: i64,
    signature: String,
) -> JoinHandle<Result<(), LatchkeyError>> {
    let sessions = Arc::clone(&state.sessions);
    let handle = handle.clone();
    tokio::spawn(async move {
        sessions
            .authenticate(&handle, &device_id, timestamp, &signature)
            .await
    })
}

fn public_code(err: &LatchkeyError) -> &'static str {
    match err {
        LatchkeyError::UnknownDevice(_) => err.code(),
        LatchkeyError::Internal(_) => err.code(),
        _ => LatchkeyError::AuthenticationFailed.code(),
    }
}
