//! Control-connection client.

use futures::{SinkExt, StreamExt};
use latchkey_core::{now_millis, ClientMessage, ServerMessage};
use latchkey_security::sign;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::backoff::Backoff;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::unlock::UnlockAction;

pub const PING_INTERVAL: Duration = Duration::from_secs(20);

/// How a connected session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The server or the network closed the socket.
    Closed,
    /// Another connection for this device took over.
    Displaced,
    /// Local shutdown was requested.
    Shutdown,
}

pub struct AgentClient<U> {
    config: AgentConfig,
    unlock: Arc<U>,
    ping_interval: Duration,
}

impl<U: UnlockAction + 'static> AgentClient<U> {
    pub fn new(config: AgentConfig, unlock: U) -> Self {
        Self {
            config,
            unlock: Arc::new(unlock),
            ping_interval: PING_INTERVAL,
        }
    }

    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    /// Keep a session open until `shutdown` flips, reconnecting with backoff.
    pub async fn run_forever(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), AgentError> {
        let url = self.config.control_url()?;
        info!(url = %url, device_id = %self.config.device_id, "Starting latchkey agent");
        let mut backoff = Backoff::default();

        loop {
            match self.run_session(&url, &mut shutdown).await {
                Ok(SessionEnd::Shutdown) => break,
                Ok(end) => {
                    backoff.reset();
                    warn!(?end, "Control connection ended");
                }
                Err(e) => error!(error = %e, "Control connection failed"),
            }
            if *shutdown.borrow() {
                break;
            }

            let delay = backoff.next_delay();
            info!(delay_secs = delay.as_secs(), "Reconnecting");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Agent stopped");
        Ok(())
    }

    /// One connection: `AUTH`, then serve pushes until the socket ends.
    ///
    /// Errors mean the session never got established (connect failure or a
    /// rejected `AUTH`); once authenticated, endings are reported as
    /// [`SessionEnd`].
    pub async fn run_session(
        &self,
        url: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, AgentError> {
        let (ws, _) = connect_async(url).await?;
        let (mut write, mut read) = ws.split();
        debug!(url = %url, "Connected, sending AUTH");

        let timestamp = now_millis();
        let auth = ClientMessage::Auth {
            device_id: self.config.device_id.clone(),
            signature: sign(&self.config.secret, &self.config.device_id, timestamp)?,
            timestamp,
        };
        write.send(encode(&auth)).await?;

        let mut authenticated = false;
        let mut ping = interval_at(Instant::now() + self.ping_interval, self.ping_interval);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                frame = read.next() => {
                    let text = match frame {
                        None | Some(Ok(Message::Close(_))) => return Ok(SessionEnd::Closed),
                        Some(Err(e)) if authenticated => {
                            warn!(error = %e, "Control connection dropped");
                            return Ok(SessionEnd::Closed);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        Some(Ok(Message::Text(text))) => text,
                        Some(Ok(_)) => continue,
                    };
                    let msg = match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => msg,
                        Err(e) => {
                            warn!(error = %e, "Ignoring unrecognised server message");
                            continue;
                        }
                    };
                    match msg {
                        ServerMessage::AuthOk { device_id } => {
                            authenticated = true;
                            ping.reset();
                            info!(device_id = %device_id, "Authenticated with gateway");
                        }
                        ServerMessage::Unlock { token } => {
                            info!(queued = token.is_some(), "Unlock signal received");
                            // Off the read loop, so PONGs and displacement are still seen.
                            let unlock = Arc::clone(&self.unlock);
                            tokio::spawn(async move {
                                if let Err(e) = unlock.unlock(token.as_deref()).await {
                                    error!(error = %e, "Unlock action failed");
                                }
                            });
                        }
                        ServerMessage::Pong => debug!("PONG"),
                        ServerMessage::Error { error } if error == "connection_displaced" => {
                            warn!("Another connection for this device replaced this one");
                            return Ok(SessionEnd::Displaced);
                        }
                        ServerMessage::Error { error } if !authenticated => {
                            return Err(AgentError::Rejected(error));
                        }
                        ServerMessage::Error { error } => error!(error = %error, "Server error"),
                    }
                }
                _ = ping.tick(), if authenticated => {
                    write.send(encode(&ClientMessage::Ping)).await?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }
        }
    }
}

fn encode(msg: &ClientMessage) -> Message {
    // Serializing these enums cannot fail.
    Message::Text(serde_json::to_string(msg).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use latchkey_core::DeviceId;
    use latchkey_security::verify_signature;
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    #[derive(Clone, Default)]
    struct RecordingUnlock {
        tokens: Arc<Mutex<Vec<Option<String>>>>,
        delay: Duration,
    }

    impl RecordingUnlock {
        fn slow(delay: Duration) -> Self {
            Self { delay, ..Self::default() }
        }

        async fn wait_for(&self, count: usize) -> Vec<Option<String>> {
            tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    let tokens = self.tokens.lock().unwrap().clone();
                    if tokens.len() >= count {
                        return tokens;
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .expect("unlock actions ran")
        }
    }

    #[async_trait]
    impl UnlockAction for RecordingUnlock {
        async fn unlock(&self, token: Option<&str>) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.tokens.lock().unwrap().push(token.map(String::from));
            Ok(())
        }
    }

    const SECRET: &str = "c2VjcmV0";

    fn agent(port: u16, unlock: RecordingUnlock) -> AgentClient<RecordingUnlock> {
        AgentClient::new(
            AgentConfig {
                server: format!("http://127.0.0.1:{port}"),
                device_id: DeviceId::from("d1"),
                secret: SECRET.into(),
                unlock_command: Vec::new(),
            },
            unlock,
        )
    }

    async fn recv_json(ws: &mut WebSocketStream<tokio::net::TcpStream>) -> Value {
        loop {
            match ws.next().await.unwrap().unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    async fn send_json(ws: &mut WebSocketStream<tokio::net::TcpStream>, value: Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    #[tokio::test]
    async fn authenticates_and_runs_unlocks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            let auth = recv_json(&mut ws).await;
            assert_eq!(auth["type"], "AUTH");
            assert_eq!(auth["deviceId"], "d1");
            let ts = auth["timestamp"].as_i64().unwrap();
            let sig = auth["signature"].as_str().unwrap();
            assert!(verify_signature(SECRET, &DeviceId::from("d1"), ts, sig));

            send_json(&mut ws, json!({ "type": "AUTH_OK", "deviceId": "d1" })).await;
            send_json(&mut ws, json!({ "type": "UNLOCK", "token": "ulk_1" })).await;
            send_json(&mut ws, json!({ "type": "UNLOCK" })).await;
            ws.close(None).await.unwrap();
        });

        let unlock = RecordingUnlock::default();
        let client = agent(port, unlock.clone());
        let (_tx, mut rx) = watch::channel(false);
        let url = client.config.control_url().unwrap();

        let end = client.run_session(&url, &mut rx).await.unwrap();
        assert_eq!(end, SessionEnd::Closed);
        server.await.unwrap();
        let mut tokens = unlock.wait_for(2).await;
        tokens.sort();
        assert_eq!(tokens, vec![None, Some("ulk_1".to_string())]);
    }

    #[tokio::test]
    async fn slow_unlock_does_not_stall_the_session() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            recv_json(&mut ws).await;
            send_json(&mut ws, json!({ "type": "AUTH_OK", "deviceId": "d1" })).await;
            send_json(&mut ws, json!({ "type": "UNLOCK", "token": "ulk_1" })).await;
            send_json(&mut ws, json!({ "type": "ERROR", "error": "connection_displaced" })).await;
            let _ = ws.next().await;
        });

        let unlock = RecordingUnlock::slow(Duration::from_secs(30));
        let client = agent(port, unlock.clone());
        let (_tx, mut rx) = watch::channel(false);
        let url = client.config.control_url().unwrap();

        let end = tokio::time::timeout(Duration::from_secs(5), client.run_session(&url, &mut rx))
            .await
            .expect("displacement seen while the unlock is still running")
            .unwrap();
        assert_eq!(end, SessionEnd::Displaced);
        assert!(unlock.tokens.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejected_auth_is_an_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            recv_json(&mut ws).await;
            send_json(&mut ws, json!({ "type": "ERROR", "error": "authentication_failed" })).await;
            // Keep the socket open; the client must give up on its own.
            let _ = ws.next().await;
        });

        let client = agent(port, RecordingUnlock::default());
        let (_tx, mut rx) = watch::channel(false);
        let url = client.config.control_url().unwrap();
        let err = client.run_session(&url, &mut rx).await.unwrap_err();
        assert!(matches!(err, AgentError::Rejected(code) if code == "authentication_failed"));
    }

    #[tokio::test]
    async fn pings_after_auth_ok() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            recv_json(&mut ws).await;
            send_json(&mut ws, json!({ "type": "AUTH_OK", "deviceId": "d1" })).await;
            let ping = recv_json(&mut ws).await;
            send_json(&mut ws, json!({ "type": "PONG" })).await;
            send_json(&mut ws, json!({ "type": "ERROR", "error": "connection_displaced" })).await;
            ping
        });

        let client = agent(port, RecordingUnlock::default()).with_ping_interval(Duration::from_millis(50));
        let (_tx, mut rx) = watch::channel(false);
        let url = client.config.control_url().unwrap();
        let end = client.run_session(&url, &mut rx).await.unwrap();

        assert_eq!(end, SessionEnd::Displaced);
        assert_eq!(server.await.unwrap(), json!({ "type": "PING" }));
    }

    #[tokio::test]
    async fn shutdown_stops_the_reconnect_loop() {
        // Nothing listens on this port, so every attempt fails and backs off.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = agent(port, RecordingUnlock::default());
        let (tx, rx) = watch::channel(false);
        let run = tokio::spawn(async move { client.run_forever(rx).await });
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("agent stops promptly")
            .unwrap()
            .unwrap();
    }
}
