//! Sweeper
//!
//! Periodically drops expired pending-unlock tokens, stale delivery records and
//! abandoned ceremony challenges.

use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::server::GatewayState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepSummary {
    pub expired_tokens: usize,
    pub forgotten_deliveries: usize,
    pub expired_challenges: usize,
}

/// One pass over every table. Safe to run at any time and any number of times.
pub async fn sweep_once(state: &GatewayState) -> SweepSummary {
    let report = state.queue.sweep().await;
    let expired_challenges = state.ceremonies.sweep_challenges().await;
    let summary = SweepSummary {
        expired_tokens: report.expired,
        forgotten_deliveries: report.forgotten,
        expired_challenges,
    };
    if summary != SweepSummary::default() {
        info!(
            expired_tokens = summary.expired_tokens,
            forgotten_deliveries = summary.forgotten_deliveries,
            expired_challenges = summary.expired_challenges,
            "Sweep removed stale entries"
        );
    }
    summary
}

/// Run [`sweep_once`] every `interval` until `stop` flips to true or its sender drops.
pub fn spawn_sweeper(
    state: GatewayState,
    interval: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; nothing is stale yet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(&state).await;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        debug!("Sweeper stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::GatewaySettings;

    #[tokio::test(start_paused = true)]
    async fn sweep_twice_removes_nothing_the_second_time() {
        let state = GatewayState::new(GatewaySettings::default());
        let grant = state.devices.pair(None).await;
        state.sessions.deliver_unlock_with_ttl(&grant.device_id, Duration::from_secs(10)).await.unwrap();
        state.sessions.deliver_unlock_with_ttl(&grant.device_id, Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(sweep_once(&state).await.expired_tokens, 1);
        assert_eq!(sweep_once(&state).await, SweepSummary::default());
        assert_eq!(state.queue.pending_count().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn background_sweeper_runs_and_stops() {
        let state = GatewayState::new(GatewaySettings::default());
        let grant = state.devices.pair(None).await;
        state.sessions.deliver_unlock_with_ttl(&grant.device_id, Duration::from_secs(5)).await.unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = spawn_sweeper(state.clone(), Duration::from_secs(60), stop_rx);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(state.queue.pending_count().await, 0);
        assert_eq!(state.queue.sweep().await.expired, 0);

        stop_tx.send(true).unwrap();
        task.await.unwrap();
    }
}
