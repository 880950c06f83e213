//! Main HTTP server: shared state, routing and lifecycle.

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use latchkey_passkey::{
    CeremonyOrchestrator, CeremonySettings, CeremonyVerifier, WebauthnVerifier, DEFAULT_CEREMONY_TIMEOUT,
};
use latchkey_security::{DeviceRegistry, HmacVerifier, DEFAULT_WINDOW_MS};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, instrument};

use crate::session_manager::SessionManager;
use crate::sweeper::spawn_sweeper;
use crate::unlock_queue::PendingUnlockQueue;
use crate::{health_api, pairing_api, unlock_api, webauthn_api, ws_server};

/// Runtime knobs for the gateway, usually built from the config file.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub passkey_token_ttl: Duration,
    pub hmac_token_ttl: Duration,
    pub sweep_interval: Duration,
    pub hmac_window: Duration,
    pub delivered_retention: Duration,
    pub ceremony_timeout: Duration,
    /// Accept passkeys whose signature counter stays at zero.
    pub allow_counterless_authenticators: bool,
    /// Fixed relying-party id; derived from `Host` when unset.
    pub rp_id: Option<String>,
    /// Fixed expected origin; derived from `Host` when unset.
    pub origin: Option<String>,
    pub rp_name: String,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            passkey_token_ttl: Duration::from_secs(30),
            hmac_token_ttl: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
            hmac_window: Duration::from_millis(DEFAULT_WINDOW_MS as u64),
            delivered_retention: Duration::from_secs(300),
            ceremony_timeout: DEFAULT_CEREMONY_TIMEOUT,
            allow_counterless_authenticators: false,
            rp_id: None,
            origin: None,
            rp_name: "Latchkey".to_string(),
        }
    }
}

/// Application state shared across routes.
#[derive(Clone)]
pub struct GatewayState {
    pub devices: Arc<DeviceRegistry>,
    pub sessions: Arc<SessionManager>,
    pub ceremonies: Arc<CeremonyOrchestrator>,
    pub queue: Arc<PendingUnlockQueue>,
    pub settings: Arc<GatewaySettings>,
    pub started_at: DateTime<Utc>,
}

impl GatewayState {
    pub fn new(settings: GatewaySettings) -> Self {
        let verifier = Arc::new(WebauthnVerifier::new(settings.ceremony_timeout));
        Self::with_verifier(settings, verifier)
    }

    /// Build the state around a specific ceremony verifier.
    pub fn with_verifier(settings: GatewaySettings, verifier: Arc<dyn CeremonyVerifier>) -> Self {
        let devices = Arc::new(DeviceRegistry::new());
        let queue = Arc::new(PendingUnlockQueue::new(settings.delivered_retention));
        let hmac = HmacVerifier::new(settings.hmac_window.as_millis() as i64);
        let sessions = Arc::new(SessionManager::new(
            devices.clone(),
            queue.clone(),
            hmac,
            settings.passkey_token_ttl,
        ));
        let ceremonies = Arc::new(CeremonyOrchestrator::new(
            devices.clone(),
            verifier,
            sessions.clone(),
            CeremonySettings {
                timeout: settings.ceremony_timeout,
                allow_counterless: settings.allow_counterless_authenticators,
            },
        ));

        Self {
            devices,
            sessions,
            ceremonies,
            queue,
            settings: Arc::new(settings),
            started_at: Utc::now(),
        }
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/health", get(health_api::get_health))
        .route("/pair", post(pairing_api::pair))
        .route("/unlock", post(unlock_api::unlock))
        .route("/unlock/:token", get(unlock_api::unlock_status))
        .route("/webauthn/register/options", post(webauthn_api::register_options))
        .route("/webauthn/register/verify", post(webauthn_api::register_verify))
        .route("/webauthn/auth/options", post(webauthn_api::auth_options))
        .route("/webauthn/auth/verify", post(webauthn_api::auth_verify))
        .route("/ws", get(ws_server::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on `listener` until `shutdown` resolves. The sweeper runs alongside and
/// stops with the server.
pub async fn serve<F>(listener: TcpListener, state: GatewayState, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, stop_rx) = watch::channel(false);
    let sweeper = spawn_sweeper(state.clone(), state.settings.sweep_interval, stop_rx);

    let app = router(state);
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed");

    let _ = stop_tx.send(true);
    let _ = sweeper.await;
    result
}

/// Starts the gateway on `addr` and runs until Ctrl-C.
#[instrument(skip(state))]
pub async fn start_server(addr: SocketAddr, state: GatewayState) -> Result<()> {
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Latchkey gateway listening on {}", listener.local_addr()?);

    serve(listener, state, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
    })
    .await
}
