//! `latchkey status`: query a running gateway's health endpoint.

use anyhow::Result;

use crate::api::{ApiClient, Health};
use crate::terminal_output::{note_error, note_success, render_table, Column};

pub async fn run(url: &str) -> Result<()> {
    let client = ApiClient::new(url);
    match client.health().await {
        Ok(health) => {
            note_success(&format!("latchkey is running at {}", client.base()));
            print!("{}", render_health(&health));
            Ok(())
        }
        Err(e) => {
            note_error(&format!("{e:#}"));
            Err(e)
        }
    }
}

fn render_health(health: &Health) -> String {
    let rows = vec![
        vec!["status".to_string(), health.status.clone()],
        vec!["devices".to_string(), health.devices.to_string()],
        vec!["passkey users".to_string(), health.passkey_users.to_string()],
        vec!["connected".to_string(), health.connected_devices.to_string()],
        vec!["pending unlocks".to_string(), health.pending_unlocks.to_string()],
        vec!["uptime".to_string(), format_uptime(health.uptime_seconds)],
        vec!["server time".to_string(), health.timestamp.clone()],
    ];
    render_table(&[Column::left("Metric"), Column::right("Value")], &rows)
}

fn format_uptime(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{h}h {m}m")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}
