//! End-to-end tests: the real router on a loopback port, driven over HTTP and
//! the control WebSocket.

use futures::{SinkExt, StreamExt};
use latchkey_core::{now_millis, DeviceId, UserId};
use latchkey_passkey::{
    AuthenticationCredential, CeremonyVerifier, IssuedChallenge, RegistrationCredential, RelyingParty,
    StoredCredential, VerifiedAuthentication, VerifiedRegistration, VerifyError,
};
use latchkey_security::sign;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crate::server::{serve, GatewaySettings, GatewayState};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Registers fine, but every assertion for it is rejected.
const REJECTED_CREDENTIAL: &str = "cmVqZWN0";
/// Rejected at registration.
const BAD_ATTESTATION: &str = "YmFk";
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Accepts everything except [`BAD_ATTESTATION`] registrations and
/// [`REJECTED_CREDENTIAL`] assertions. Counters strictly increase.
#[derive(Default)]
struct FakeVerifier {
    counter: AtomicU32,
}

impl CeremonyVerifier for FakeVerifier {
    fn start_registration(
        &self,
        _relying_party: &RelyingParty,
        _user_id: &UserId,
        _exclude: &[StoredCredential],
    ) -> Result<IssuedChallenge, VerifyError> {
        Ok(IssuedChallenge {
            options: json!({ "challenge": "Y2hhbA" }),
            state: "registration".into(),
        })
    }

    fn finish_registration(
        &self,
        _relying_party: &RelyingParty,
        _state: &str,
        credential: &RegistrationCredential,
    ) -> Result<VerifiedRegistration, VerifyError> {
        if credential.id == BAD_ATTESTATION {
            return Err(VerifyError::rejected("fake rejection"));
        }
        Ok(VerifiedRegistration {
            credential_id: credential.id.clone(),
            material: format!("key:{}", credential.id),
            counter: 0,
        })
    }

    fn start_authentication(
        &self,
        _relying_party: &RelyingParty,
        _credentials: &[StoredCredential],
    ) -> Result<IssuedChallenge, VerifyError> {
        Ok(IssuedChallenge {
            options: json!({ "challenge": "Y2hhbA" }),
            state: "authentication".into(),
        })
    }

    fn finish_authentication(
        &self,
        _relying_party: &RelyingParty,
        _state: &str,
        credential: &AuthenticationCredential,
        stored: &StoredCredential,
    ) -> Result<VerifiedAuthentication, VerifyError> {
        if credential.id == REJECTED_CREDENTIAL {
            return Err(VerifyError::rejected("fake rejection"));
        }
        Ok(VerifiedAuthentication {
            credential_id: stored.credential_id.clone(),
            new_counter: self.counter.fetch_add(1, Ordering::SeqCst) + 1,
            material: None,
        })
    }
}

struct TestServer {
    base: String,
    ws_url: String,
    state: GatewayState,
    http: reqwest::Client,
    _shutdown: oneshot::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        let state = GatewayState::with_verifier(GatewaySettings::default(), Arc::new(FakeVerifier::default()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(serve(listener, state.clone(), async {
            let _ = rx.await;
        }));

        Self {
            base: format!("http://{addr}"),
            ws_url: format!("ws://{addr}/ws"),
            state,
            http: reqwest::Client::new(),
            _shutdown: tx,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .http
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.http.get(format!("{}{path}", self.base)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn pair(&self) -> (String, String) {
        let (status, body) = self.post("/pair", json!({ "name": "test laptop" })).await;
        assert_eq!(status, 200);
        (
            body["deviceId"].as_str().unwrap().to_string(),
            body["secret"].as_str().unwrap().to_string(),
        )
    }

    async fn register(&self, user: &str, device: &str, credential_id: &str) {
        let (status, _) = self
            .post("/webauthn/register/options", json!({ "userId": user, "deviceId": device }))
            .await;
        assert_eq!(status, 200);
        let (status, body) = self
            .post(
                "/webauthn/register/verify",
                json!({ "userId": user, "credential": attestation(credential_id) }),
            )
            .await;
        assert_eq!(status, 200, "{body}");
        assert_eq!(body, json!({ "verified": true }));
    }

    async fn connect(&self) -> Ws {
        let (ws, _) = connect_async(self.ws_url.as_str()).await.unwrap();
        ws
    }
}

fn attestation(id: &str) -> Value {
    json!({
        "id": id,
        "type": "public-key",
        "response": { "clientDataJSON": "e30", "attestationObject": "o2Nm" }
    })
}

fn assertion(id: &str) -> Value {
    json!({
        "id": id,
        "response": { "clientDataJSON": "e30", "authenticatorData": "AA", "signature": "AA" }
    })
}

fn auth_frame(device: &str, secret: &str) -> Message {
    let ts = now_millis();
    let signature = sign(secret, &DeviceId::from(device), ts).unwrap();
    Message::Text(
        json!({ "type": "AUTH", "deviceId": device, "signature": signature, "timestamp": ts }).to_string(),
    )
}

fn signed_unlock(device: &str, secret: &str) -> Value {
    let ts = now_millis();
    let signature = sign(secret, &DeviceId::from(device), ts).unwrap();
    json!({ "deviceId": device, "signature": signature, "timestamp": ts })
}

async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let frame = timeout(FRAME_TIMEOUT, ws.next())
            .await
            .expect("frame within timeout")
            .expect("stream still open")
            .expect("frame readable");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

/// Wait for the server to close the socket, skipping any text it sends first.
async fn expect_closed(ws: &mut Ws) {
    loop {
        match timeout(FRAME_TIMEOUT, ws.next()).await.expect("close within timeout") {
            None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return,
            Some(Ok(_)) => continue,
        }
    }
}

#[tokio::test]
async fn queued_unlock_is_delivered_on_connect() {
    let server = TestServer::start().await;
    let (device, secret) = server.pair().await;
    server.register("u1", &device, "cDE").await;

    let (status, _) = server.post("/webauthn/auth/options", json!({ "userId": "u1" })).await;
    assert_eq!(status, 200);
    let (status, body) = server
        .post("/webauthn/auth/verify", json!({ "userId": "u1", "credential": assertion("cDE") }))
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["status"], "queued");
    let token = body["token"].as_str().unwrap().to_string();
    assert!(token.starts_with("ulk_"));

    let (_, probe) = server.get(&format!("/unlock/{token}")).await;
    assert_eq!(probe["status"], "pending");

    let mut ws = server.connect().await;
    ws.send(auth_frame(&device, &secret)).await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!({ "type": "AUTH_OK", "deviceId": device }));
    assert_eq!(next_json(&mut ws).await, json!({ "type": "UNLOCK", "token": token }));

    let (_, probe) = server.get(&format!("/unlock/{token}")).await;
    assert_eq!(probe["status"], "delivered");
}

#[tokio::test]
async fn hmac_unlock_pushes_to_connected_device() {
    let server = TestServer::start().await;
    let (device, secret) = server.pair().await;

    let mut ws = server.connect().await;
    ws.send(auth_frame(&device, &secret)).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "AUTH_OK");

    let (status, body) = server.post("/unlock", signed_unlock(&device, &secret)).await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["status"], "sent");
    assert!(body.get("token").is_none());
    assert_eq!(next_json(&mut ws).await, json!({ "type": "UNLOCK" }));
    assert_eq!(server.state.queue.pending_count().await, 0);
}

#[tokio::test]
async fn failed_auth_keeps_connection_open() {
    let server = TestServer::start().await;
    let (device, secret) = server.pair().await;
    let mut ws = server.connect().await;

    // Unauthenticated PING is ignored rather than answered.
    ws.send(Message::Text(r#"{"type":"PING"}"#.into())).await.unwrap();
    ws.send(auth_frame(&device, "not-the-secret")).await.unwrap();
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "type": "ERROR", "error": "authentication_failed" })
    );

    ws.send(auth_frame(&device, &secret)).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "AUTH_OK");
    ws.send(Message::Text(r#"{"type":"PING"}"#.into())).await.unwrap();
    assert_eq!(next_json(&mut ws).await, json!({ "type": "PONG" }));
}

#[tokio::test]
async fn auth_for_unknown_device_reports_it() {
    let server = TestServer::start().await;
    let mut ws = server.connect().await;
    ws.send(auth_frame("ghost", "secret")).await.unwrap();
    assert_eq!(
        next_json(&mut ws).await,
        json!({ "type": "ERROR", "error": "unknown_device" })
    );
}

#[tokio::test]
async fn malformed_frame_closes_connection() {
    let server = TestServer::start().await;
    let (device, secret) = server.pair().await;
    let mut ws = server.connect().await;
    ws.send(auth_frame(&device, &secret)).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "AUTH_OK");

    ws.send(Message::Text(r#"{"type":"UNLOCK"}"#.into())).await.unwrap();
    expect_closed(&mut ws).await;

    // The binding is cleared, so the next unlock queues.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (_, body) = server.post("/unlock", signed_unlock(&device, &secret)).await;
    assert_eq!(body["status"], "queued");
}

#[tokio::test]
async fn binary_frame_closes_connection() {
    let server = TestServer::start().await;
    let mut ws = server.connect().await;
    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    expect_closed(&mut ws).await;
}

#[tokio::test]
async fn second_connection_displaces_first() {
    let server = TestServer::start().await;
    let (device, secret) = server.pair().await;

    let mut first = server.connect().await;
    first.send(auth_frame(&device, &secret)).await.unwrap();
    assert_eq!(next_json(&mut first).await["type"], "AUTH_OK");

    let mut second = server.connect().await;
    second.send(auth_frame(&device, &secret)).await.unwrap();
    assert_eq!(next_json(&mut second).await["type"], "AUTH_OK");

    assert_eq!(
        next_json(&mut first).await,
        json!({ "type": "ERROR", "error": "connection_displaced" })
    );
    expect_closed(&mut first).await;

    let (_, body) = server.post("/unlock", signed_unlock(&device, &secret)).await;
    assert_eq!(body["status"], "sent");
    assert_eq!(next_json(&mut second).await, json!({ "type": "UNLOCK" }));
}

#[tokio::test]
async fn error_responses_have_stable_shape() {
    let server = TestServer::start().await;
    let (device, secret) = server.pair().await;

    let (status, body) = server
        .post("/webauthn/register/options", json!({ "userId": "u1", "deviceId": "ghost" }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_device");
    assert!(body["message"].is_string());

    let (status, body) = server.post("/webauthn/register/options", json!({ "userId": "u1" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_input");

    let (status, body) = server
        .post("/webauthn/register/verify", json!({ "userId": "u1", "credential": attestation("cDE") }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "no_pending_ceremony");

    let (status, body) = server.post("/webauthn/auth/options", json!({ "userId": "nobody" })).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "no_passkeys");

    let (status, body) = server.post("/unlock", signed_unlock("ghost", &secret)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "unknown_device");

    let (status, body) = server.post("/unlock", signed_unlock(&device, "wrong")).await;
    assert_eq!(status, 401);
    assert_eq!(body["error"], "authentication_failed");

    let (status, body) = server.get("/unlock/ulk_unknown").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "not_delivered");
}

#[tokio::test]
async fn ceremony_rejection_status_depends_on_ceremony() {
    let server = TestServer::start().await;
    let (device, _) = server.pair().await;

    server
        .post("/webauthn/register/options", json!({ "userId": "u1", "deviceId": device }))
        .await;
    let (status, body) = server
        .post(
            "/webauthn/register/verify",
            json!({ "userId": "u1", "credential": attestation(BAD_ATTESTATION) }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "ceremony_rejected");

    server.register("u2", &device, REJECTED_CREDENTIAL).await;
    server.post("/webauthn/auth/options", json!({ "userId": "u2" })).await;
    let (status, body) = server
        .post(
            "/webauthn/auth/verify",
            json!({ "userId": "u2", "credential": assertion(REJECTED_CREDENTIAL) }),
        )
        .await;
    assert_eq!(status, 401);
    assert_eq!(body, json!({ "error": "ceremony_rejected", "message": "ceremony verification failed" }));
    assert_eq!(server.state.queue.pending_count().await, 0);

    // The challenge was spent by the failed attempt.
    let (status, body) = server
        .post(
            "/webauthn/auth/verify",
            json!({ "userId": "u2", "credential": assertion(REJECTED_CREDENTIAL) }),
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "no_pending_ceremony");
}

#[tokio::test]
async fn explicit_target_device_receives_unlock() {
    let server = TestServer::start().await;
    let (home, _) = server.pair().await;
    let (other, other_secret) = server.pair().await;
    server.register("u1", &home, "cDE").await;

    let mut ws = server.connect().await;
    ws.send(auth_frame(&other, &other_secret)).await.unwrap();
    assert_eq!(next_json(&mut ws).await["type"], "AUTH_OK");

    server.post("/webauthn/auth/options", json!({ "userId": "u1" })).await;
    let (status, body) = server
        .post(
            "/webauthn/auth/verify",
            json!({ "userId": "u1", "credential": assertion("cDE"), "deviceId": other }),
        )
        .await;
    assert_eq!(status, 200, "{body}");
    assert_eq!(body["status"], "sent");
    assert_eq!(body["deviceId"], other);
    assert_eq!(next_json(&mut ws).await, json!({ "type": "UNLOCK" }));
}

#[tokio::test]
async fn health_reports_table_sizes() {
    let server = TestServer::start().await;
    let (device, secret) = server.pair().await;
    server.pair().await;
    server.register("u1", &device, "cDE").await;
    server.post("/unlock", signed_unlock(&device, &secret)).await;

    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["devices"], 2);
    assert_eq!(body["passkeyUsers"], 1);
    assert_eq!(body["connectedDevices"], 0);
    assert_eq!(body["pendingUnlocks"], 1);
}

#[tokio::test]
async fn pairing_accepts_empty_body_and_never_repeats_secrets() {
    let server = TestServer::start().await;
    let resp = server.http.post(format!("{}/pair", server.base)).send().await.unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let first: Value = resp.json().await.unwrap();
    let (_, second) = server.pair().await;
    assert_ne!(first["secret"].as_str().unwrap(), second);
}
