//! Pending-Unlock Queue.
//!
//! Tokens for devices that were offline when an unlock was authorized. Each
//! token has an absolute expiry; the device's next successful `AUTH` drains the
//! live ones. Delivered tokens are remembered for a while so callers can ask
//! what happened to them.

use latchkey_core::DeviceId;
use latchkey_security::generate_unlock_token;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockStatus {
    Pending,
    Delivered,
    NotDelivered,
}

#[derive(Debug, Clone)]
pub struct QueuedToken {
    pub token: String,
    pub device_id: DeviceId,
    pub queued_at: Instant,
    pub expires_at: Instant,
}

impl QueuedToken {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub forgotten: usize,
}

#[derive(Debug, Default)]
struct QueueInner {
    pending: HashMap<String, QueuedToken>,
    delivered: HashMap<String, Instant>,
}

#[derive(Debug)]
pub struct PendingUnlockQueue {
    inner: Mutex<QueueInner>,
    delivered_retention: Duration,
}

impl PendingUnlockQueue {
    pub fn new(delivered_retention: Duration) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            delivered_retention,
        }
    }

    /// Queue a fresh token for `device_id`, valid for `ttl`.
    pub async fn enqueue(&self, device_id: &DeviceId, ttl: Duration) -> String {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let mut token = generate_unlock_token();
        while inner.pending.contains_key(&token) || inner.delivered.contains_key(&token) {
            token = generate_unlock_token();
        }
        inner.pending.insert(
            token.clone(),
            QueuedToken {
                token: token.clone(),
                device_id: device_id.clone(),
                queued_at: now,
                expires_at: now + ttl,
            },
        );
        debug!(device_id = %device_id, ttl_secs = ttl.as_secs(), "Queued unlock token");
        token
    }

    /// Remove every token for `device_id`. Live tokens are returned oldest first;
    /// expired ones are dropped.
    pub async fn take_for_device(&self, device_id: &DeviceId) -> Vec<QueuedToken> {
        let now = Instant::now();
        let mut inner = self.inner.lock().await;
        let keys: Vec<String> = inner
            .pending
            .iter()
            .filter(|(_, q)| &q.device_id == device_id)
            .map(|(k, _)| k.clone())
            .collect();

        let mut live: Vec<QueuedToken> = keys
            .into_iter()
            .filter_map(|k| inner.pending.remove(&k))
            .filter(|q| q.is_live(now))
            .collect();
        live.sort_by_key(|q| q.queued_at);
        live
    }

    /// Put a token back after a failed push.
    pub async fn restore(&self, queued: QueuedToken) {
        self.inner
            .lock()
            .await
            .pending
            .insert(queued.token.clone(), queued);
    }

    pub async fn mark_delivered(&self, token: &str) {
        let mut inner = self.inner.lock().await;
        inner.pending.remove(token);
        inner.delivered.insert(token.to_string(), Instant::now());
    }

    pub async fn status(&self, token: &str) -> UnlockStatus {
        let now = Instant::now();
        let inner = self.inner.lock().await;
        if inner.pending.get(token).is_some_and(|q| q.is_live(now)) {
            UnlockStatus::Pending
        } else if inner.delivered.contains_key(token) {
            UnlockStatus::Delivered
        } else {
            UnlockStatus::NotDelivered
        }
    }

    /// Drop expired tokens and delivery records past the retention window.
    pub async fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let retention = self.delivered_retention;
        let mut inner = self.inner.lock().await;

        let before = inner.pending.len();
        inner.pending.retain(|_, q| q.is_live(now));
        let expired = before - inner.pending.len();

        let before = inner.delivered.len();
        inner
            .delivered
            .retain(|_, at| now.saturating_duration_since(*at) < retention);
        let forgotten = before - inner.delivered.len();

        SweepReport { expired, forgotten }
    }

    /// Number of queued tokens that have not yet expired.
    pub async fn pending_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .await
            .pending
            .values()
            .filter(|q| q.is_live(now))
            .count()
    }
}
