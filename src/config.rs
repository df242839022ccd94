//! Configuration for the range monitor
//!
//! Everything loads from environment variables (with .env support) and
//! has a sane default except the wallet address - monitoring a wallet
//! nobody named is meaningless, so that one is fatal at startup.

use alloy_primitives::{address, Address};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Default registry used when REGISTRY_ADDRESS is not set.
const DEFAULT_REGISTRY: Address = address!("7f9adfbd38b669f03d1d11000bc76b9aaea28a81");

/// Default public RPC endpoint.
const DEFAULT_RPC_URL: &str = "https://mainnet.base.org";

// ============================================
// MAIN CONFIGURATION
// ============================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // ========== Network Settings ==========
    /// Primary RPC URL
    pub rpc_url: String,

    /// Backup RPC URLs for failover
    pub backup_rpc_urls: Vec<String>,

    // ========== Monitoring Targets ==========
    /// Wallet whose positions are monitored (required)
    pub wallet_address: String,

    /// Position registry contract
    pub registry_address: String,

    /// Offsets scanned when the registry will not report its pool count
    pub max_pool_scan: u64,

    // ========== Timing ==========
    /// Poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Pool state cache TTL in milliseconds
    pub cache_ttl_ms: u64,

    /// Minimum delay between RPC dispatches in milliseconds
    pub min_call_delay_ms: u64,

    /// Cooldown between repeat alerts for the same position (ms)
    pub alert_cooldown_ms: u64,

    // ========== Batching ==========
    /// Calls per JSON-RPC batch request
    pub batch_chunk_size: usize,

    /// Retries for rate-limited dispatches
    pub max_retries: u32,

    // ========== Notifications ==========
    /// Pushover application token
    pub pushover_token: Option<String>,

    /// Pushover user key
    pub pushover_user: Option<String>,

    /// JSONL alert log path
    pub alert_log_path: String,
}

impl Config {
    /// Load configuration from environment variables and .env file
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            // Network
            rpc_url: env::var("RPC_URL").unwrap_or_else(|_| DEFAULT_RPC_URL.to_string()),
            backup_rpc_urls: env::var("BACKUP_RPC_URLS")
                .map(|s| s.split(',').map(String::from).collect())
                .unwrap_or_default(),

            // Targets
            wallet_address: env::var("WALLET_ADDRESS").unwrap_or_default(),
            registry_address: env::var("REGISTRY_ADDRESS")
                .unwrap_or_else(|_| format!("{:?}", DEFAULT_REGISTRY)),
            max_pool_scan: env::var("MAX_POOL_SCAN")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .unwrap_or(4000),

            // Timing
            poll_interval_ms: env::var("POLL_INTERVAL_MS")
                .unwrap_or_else(|_| "600000".to_string()) // 10 minutes
                .parse()
                .unwrap_or(600_000),
            cache_ttl_ms: env::var("CACHE_TTL_MS")
                .unwrap_or_else(|_| "300000".to_string()) // 5 minutes
                .parse()
                .unwrap_or(300_000),
            min_call_delay_ms: env::var("MIN_CALL_DELAY_MS")
                .unwrap_or_else(|_| "250".to_string())
                .parse()
                .unwrap_or(250),
            alert_cooldown_ms: env::var("ALERT_COOLDOWN_MS")
                .unwrap_or_else(|_| "3600000".to_string()) // 1 hour
                .parse()
                .unwrap_or(3_600_000),

            // Batching
            batch_chunk_size: env::var("BATCH_CHUNK_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .unwrap_or(100),
            max_retries: env::var("MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .unwrap_or(3),

            // Notifications
            pushover_token: env::var("PUSHOVER_TOKEN").ok().filter(|s| !s.is_empty()),
            pushover_user: env::var("PUSHOVER_USER").ok().filter(|s| !s.is_empty()),
            alert_log_path: env::var("ALERT_LOG_PATH")
                .unwrap_or_else(|_| "./logs/alerts.log".to_string()),
        })
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration; errors here abort startup.
    pub fn validate(&self) -> Result<()> {
        if self.wallet_address.is_empty() {
            return Err(eyre::eyre!("WALLET_ADDRESS is required"));
        }
        if Address::from_str(&self.wallet_address).is_err() {
            return Err(eyre::eyre!(
                "WALLET_ADDRESS is not a valid address: {}",
                self.wallet_address
            ));
        }
        if Address::from_str(&self.registry_address).is_err() {
            return Err(eyre::eyre!(
                "REGISTRY_ADDRESS is not a valid address: {}",
                self.registry_address
            ));
        }
        if self.rpc_url.is_empty() || self.rpc_url.contains("YOUR_API_KEY") {
            return Err(eyre::eyre!("Invalid RPC_URL - please set a valid endpoint"));
        }
        if self.poll_interval_ms == 0 {
            return Err(eyre::eyre!("POLL_INTERVAL_MS must be positive"));
        }
        if self.batch_chunk_size == 0 {
            return Err(eyre::eyre!("BATCH_CHUNK_SIZE must be positive"));
        }
        Ok(())
    }

    pub fn wallet(&self) -> Result<Address> {
        Address::from_str(&self.wallet_address)
            .map_err(|e| eyre::eyre!("invalid wallet address: {}", e))
    }

    pub fn registry(&self) -> Result<Address> {
        Address::from_str(&self.registry_address)
            .map_err(|e| eyre::eyre!("invalid registry address: {}", e))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_millis(self.cache_ttl_ms)
    }

    pub fn min_call_delay(&self) -> Duration {
        Duration::from_millis(self.min_call_delay_ms)
    }

    pub fn alert_cooldown(&self) -> Duration {
        Duration::from_millis(self.alert_cooldown_ms)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("╔════════════════════════════════════════════════════════════╗");
        println!("║              TICKWATCH - CONFIGURATION                     ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Wallet:      {:<45} ║", truncate(&self.wallet_address, 45));
        println!("║ Registry:    {:<45} ║", truncate(&self.registry_address, 45));
        println!("║ RPC:         {:<45} ║", truncate(&self.rpc_url, 45));
        println!("║ Backups:     {:<45} ║", self.backup_rpc_urls.len());
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║ Poll every:  {:<42} ms ║", self.poll_interval_ms);
        println!("║ Cache TTL:   {:<42} ms ║", self.cache_ttl_ms);
        println!("║ Call gap:    {:<42} ms ║", self.min_call_delay_ms);
        println!("║ Cooldown:    {:<42} ms ║", self.alert_cooldown_ms);
        println!("╠════════════════════════════════════════════════════════════╣");
        println!(
            "║ Pushover:    {:<45} ║",
            if self.pushover_token.is_some() && self.pushover_user.is_some() {
                "✓ Configured"
            } else {
                "✗ Not Set (log only)"
            }
        );
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        format!("{}...", &s[..max.saturating_sub(3)])
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            rpc_url: DEFAULT_RPC_URL.to_string(),
            backup_rpc_urls: vec![],
            wallet_address: String::new(),
            registry_address: format!("{:?}", DEFAULT_REGISTRY),
            max_pool_scan: 4000,
            poll_interval_ms: 600_000,
            cache_ttl_ms: 300_000,
            min_call_delay_ms: 250,
            alert_cooldown_ms: 3_600_000,
            batch_chunk_size: 100,
            max_retries: 3,
            pushover_token: None,
            pushover_user: None,
            alert_log_path: "./logs/alerts.log".to_string(),
        }
    }
}

// ============================================
// TESTS
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.poll_interval_ms, 600_000);
        assert_eq!(config.batch_chunk_size, 100);
        assert!(config.pushover_token.is_none());
        assert!(config.registry().is_ok());
    }

    #[test]
    fn test_missing_wallet_is_fatal() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_wallet_passes() {
        let config = Config {
            wallet_address: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.wallet().is_ok());
    }

    #[test]
    fn test_garbage_wallet_is_fatal() {
        let config = Config {
            wallet_address: "not-an-address".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_poll_interval_is_fatal() {
        let config = Config {
            wallet_address: "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2".to_string(),
            poll_interval_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_accessors() {
        let config = Config::default();
        assert_eq!(config.poll_interval(), Duration::from_secs(600));
        assert_eq!(config.min_call_delay(), Duration::from_millis(250));
    }
}
