//! Push notifications - Pushover delivery + local alert log
//!
//! Thin delivery layer: the monitor decides WHAT to send, this module
//! only formats and ships it. Send failures are logged and forgotten -
//! never retried, never fatal to the poll cycle.
//!
//! Without PUSHOVER_TOKEN / PUSHOVER_USER the client runs disabled and
//! alerts only reach the log output and the JSONL alert file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use eyre::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::monitor::{Alert, AlertKind, StartupSummary};

const PUSHOVER_API_URL: &str = "https://api.pushover.net/1/messages.json";

// ============================================
// PUSH CLIENT
// ============================================

pub struct PushClient {
    client: reqwest::Client,
    token: Option<String>,
    user: Option<String>,
    alert_log_path: Option<PathBuf>,
}

impl PushClient {
    pub fn new(token: Option<String>, user: Option<String>, alert_log_path: Option<PathBuf>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        let enabled = token.is_some() && user.is_some();
        if !enabled {
            info!("Push notifications disabled (no Pushover credentials)");
        }

        Self {
            client,
            token,
            user,
            alert_log_path,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.token.is_some() && self.user.is_some()
    }

    /// Deliver one alert: push + log line + JSONL record. Failures are
    /// warnings only.
    pub async fn send_alert(&self, alert: &Alert) {
        let (title, message) = format_alert(alert);
        info!("ALERT: {} - {}", title, message);

        if let Some(path) = &self.alert_log_path {
            if let Err(e) = AlertRecord::from_alert(alert).append_to_file(path) {
                warn!("Failed to append alert log: {}", e);
            }
        }

        if let Err(e) = self.push(&title, &message).await {
            warn!("Push notification failed: {}", e);
        }
    }

    pub async fn send_startup_summary(&self, summary: &StartupSummary) {
        let title = "Position monitor started".to_string();
        let message = format!(
            "Wallet {:?}: {} positions ({} concentrated), {} out of range",
            summary.wallet, summary.total_positions, summary.cl_positions, summary.out_of_range
        );
        info!("{} - {}", title, message);

        if let Err(e) = self.push(&title, &message).await {
            warn!("Push notification failed: {}", e);
        }
    }

    async fn push(&self, title: &str, message: &str) -> Result<()> {
        let (token, user) = match (&self.token, &self.user) {
            (Some(t), Some(u)) => (t, u),
            _ => return Ok(()), // disabled
        };

        let payload = serde_json::json!({
            "token": token,
            "user": user,
            "title": title,
            "message": message,
        });

        let response = self.client.post(PUSHOVER_API_URL).json(&payload).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            eyre::bail!("Pushover API error: {} - {}", status, body);
        }
        Ok(())
    }
}

// ============================================
// FORMATTING
// ============================================

fn format_alert(alert: &Alert) -> (String, String) {
    let s = &alert.status;
    match &alert.kind {
        AlertKind::OutOfRange { direction } => (
            format!("{} #{} out of range", s.pool_symbol, s.position_id),
            format!(
                "Tick {} is {} range [{}, {}){}",
                s.current_tick,
                direction,
                s.tick_lower,
                s.tick_upper,
                if s.staked { " (staked)" } else { "" }
            ),
        ),
        AlertKind::BackInRange => (
            format!("{} #{} back in range", s.pool_symbol, s.position_id),
            format!(
                "Tick {} returned inside [{}, {}){}",
                s.current_tick,
                s.tick_lower,
                s.tick_upper,
                if s.staked { " (staked)" } else { "" }
            ),
        ),
        AlertKind::Unstaked => (
            format!("{} #{} not staked", s.pool_symbol, s.position_id),
            format!(
                "Position earns no emissions; tick {} in [{}, {})",
                s.current_tick, s.tick_lower, s.tick_upper
            ),
        ),
    }
}

// ============================================
// ALERT LOG
// ============================================

/// One alert as a JSON line in the local alert log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRecord {
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub pool: String,
    pub pool_symbol: String,
    pub position_id: String,
    pub current_tick: i32,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub staked: bool,
}

impl AlertRecord {
    pub fn from_alert(alert: &Alert) -> Self {
        let s = &alert.status;
        let kind = match &alert.kind {
            AlertKind::OutOfRange { direction } => format!("out_of_range_{}", direction),
            AlertKind::BackInRange => "back_in_range".to_string(),
            AlertKind::Unstaked => "unstaked".to_string(),
        };
        Self {
            timestamp: Utc::now(),
            kind,
            pool: format!("{:?}", s.pool),
            pool_symbol: s.pool_symbol.clone(),
            position_id: s.position_id.to_string(),
            current_tick: s.current_tick,
            tick_lower: s.tick_lower,
            tick_upper: s.tick_upper,
            staked: s.staked,
        }
    }

    /// Append this record to a file, creating parent directories.
    pub fn append_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;

        let json = serde_json::to_string(self)?;
        writeln!(file, "{}", json)?;

        Ok(())
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::{PositionStatus, RangeDirection};
    use alloy_primitives::{address, U256};

    fn alert(kind: AlertKind) -> Alert {
        Alert {
            kind,
            status: PositionStatus {
                pool: address!("1111111111111111111111111111111111111111"),
                position_id: U256::from(7u64),
                pool_symbol: "WETH/USDC".to_string(),
                current_tick: 1_150,
                tick_lower: 900,
                tick_upper: 1_100,
                in_range: false,
                staked: true,
            },
        }
    }

    #[test]
    fn test_out_of_range_message_has_direction() {
        let (title, message) = format_alert(&alert(AlertKind::OutOfRange {
            direction: RangeDirection::Above,
        }));
        assert!(title.contains("WETH/USDC"));
        assert!(title.contains("#7"));
        assert!(message.contains("above"));
        assert!(message.contains("[900, 1100)"));
    }

    #[test]
    fn test_alert_record_kind_tags() {
        let record = AlertRecord::from_alert(&alert(AlertKind::OutOfRange {
            direction: RangeDirection::Below,
        }));
        assert_eq!(record.kind, "out_of_range_below");
        assert_eq!(record.position_id, "7");

        let record = AlertRecord::from_alert(&alert(AlertKind::BackInRange));
        assert_eq!(record.kind, "back_in_range");
    }

    #[test]
    fn test_disabled_client_does_not_push() {
        let client = PushClient::new(None, None, None);
        assert!(!client.is_enabled());
        // push() on a disabled client is a no-op Ok
        tokio_test::block_on(async {
            client.push("t", "m").await.unwrap();
        });
    }
}
