//! Configuration management for the watcher.
//!
//! Loads configuration from YAML files and environment variables.
//! Environment variables override YAML values.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Ledger (JSON-RPC) endpoint configuration
    pub ledger: LedgerConfig,
    /// Poll cycle configuration
    #[serde(default)]
    pub poll: PollConfig,
    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Price oracle configuration
    #[serde(default)]
    pub prices: PriceConfig,
    /// Telegram transport configuration
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// Enhanced token discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,
}

/// Ledger endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// JSON-RPC endpoint URL
    pub rpc_url: String,
    /// Per-request timeout in milliseconds
    #[serde(default = "default_rpc_timeout")]
    pub timeout_ms: u64,
    /// Bounded fan-out for concurrent block/balance fetches
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_rpc_timeout() -> u64 {
    10_000
}

fn default_max_concurrency() -> usize {
    8
}

/// Poll cycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollConfig {
    /// Seconds between poll cycles
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Blocks withheld from the scan tip to reduce reorg exposure
    #[serde(default = "default_confirmation_lag")]
    pub confirmation_lag: u64,
    /// Starting height when no cursor has ever been committed.
    /// When unset, the first cycle starts a small window behind the tip.
    #[serde(default)]
    pub start_height: Option<u64>,
    /// Blocks behind the tip for the implicit first-run start
    #[serde(default = "default_bootstrap_window")]
    pub bootstrap_window: u64,
    /// Retry attempts for a transient failure before the cycle aborts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Base backoff delay in milliseconds
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
            confirmation_lag: default_confirmation_lag(),
            start_height: None,
            bootstrap_window: default_bootstrap_window(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}

fn default_confirmation_lag() -> u64 {
    3
}

fn default_bootstrap_window() -> u64 {
    100
}

fn default_max_retries() -> u32 {
    4
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    15_000
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("data/etherwatch.db")
}

fn default_max_connections() -> u32 {
    5
}

/// Price oracle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PriceConfig {
    /// Price API base URL
    #[serde(default = "default_price_url")]
    pub base_url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_price_timeout")]
    pub timeout_ms: u64,
    /// Seconds a cached price stays fresh
    #[serde(default = "default_price_ttl")]
    pub cache_ttl_secs: i64,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            base_url: default_price_url(),
            timeout_ms: default_price_timeout(),
            cache_ttl_secs: default_price_ttl(),
        }
    }
}

fn default_price_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}

fn default_price_timeout() -> u64 {
    10_000
}

fn default_price_ttl() -> i64 {
    300
}

/// Telegram transport configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather (loaded from env)
    #[serde(default)]
    pub bot_token: String,
    /// Whether the transport is enabled
    #[serde(default)]
    pub enabled: bool,
}

/// Enhanced token discovery configuration (Alchemy-style endpoint).
/// Optional; absence degrades the aggregator to the curated list.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DiscoveryConfig {
    /// Whether enhanced discovery is attempted
    #[serde(default)]
    pub enabled: bool,
    /// Endpoint URL; falls back to the ledger RPC URL when empty
    #[serde(default)]
    pub rpc_url: String,
}

impl AppConfig {
    /// Load configuration from `config/default.yaml` (optional) plus
    /// `ETHERWATCH_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(
                Environment::with_prefix("ETHERWATCH")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Sanity-check values that would otherwise fail deep inside a cycle.
    pub fn validate(&self) -> Result<(), String> {
        if self.ledger.rpc_url.is_empty() {
            return Err("ledger.rpc_url must be set".to_string());
        }
        if self.ledger.max_concurrency == 0 {
            return Err("ledger.max_concurrency must be at least 1".to_string());
        }
        if self.poll.interval_secs == 0 {
            return Err("poll.interval_secs must be at least 1".to_string());
        }
        if self.poll.backoff_base_ms == 0 {
            return Err("poll.backoff_base_ms must be nonzero".to_string());
        }
        if self.telegram.enabled && self.telegram.bot_token.is_empty() {
            return Err("telegram.bot_token must be set when telegram.enabled".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> AppConfig {
        AppConfig {
            ledger: LedgerConfig {
                rpc_url: "http://localhost:8545".to_string(),
                timeout_ms: default_rpc_timeout(),
                max_concurrency: default_max_concurrency(),
            },
            poll: PollConfig::default(),
            database: DatabaseConfig::default(),
            prices: PriceConfig::default(),
            telegram: TelegramConfig::default(),
            discovery: DiscoveryConfig::default(),
        }
    }

    #[test]
    fn defaults_validate() {
        assert!(minimal().validate().is_ok());
    }

    #[test]
    fn rejects_empty_rpc_url() {
        let mut cfg = minimal();
        cfg.ledger.rpc_url.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_enabled_telegram_without_token() {
        let mut cfg = minimal();
        cfg.telegram.enabled = true;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_lag_and_interval() {
        let cfg = minimal();
        assert_eq!(cfg.poll.confirmation_lag, 3);
        assert_eq!(cfg.poll.interval_secs, 30);
    }
}
