//! Configuration loading and validation

use serde::Deserialize;
use crate::error::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub shop: ShopConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    pub telegram: Option<TelegramConfig>,
    pub watchlist: Option<WatchlistConfig>,
    pub dashboard: Option<DashboardConfig>,
}

/// Upstream shop API endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct ShopConfig {
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

/// Scan loop and cache tuning
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    /// Global scan tick interval
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Catalog cache freshness window
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,
    /// Cache eviction sweep interval
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
    /// Fixed UTC offset (hours) for schedule-time matching
    #[serde(default = "default_tz_offset")]
    pub timezone_offset_hours: i32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
            cache_ttl_ms: default_cache_ttl_ms(),
            sweep_interval_secs: default_sweep_secs(),
            timezone_offset_hours: default_tz_offset(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Chat that receives startup/error/report notices
    pub admin_chat_id: i64,
    #[serde(default = "default_true")]
    pub notify_errors: bool,
}

/// Fixed product set for the periodic delta report
#[derive(Debug, Clone, Deserialize)]
pub struct WatchlistConfig {
    #[serde(default)]
    pub product_ids: Vec<String>,
    #[serde(default = "default_watch_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_tick_secs() -> u64 {
    2
}

fn default_cache_ttl_ms() -> u64 {
    1500
}

fn default_sweep_secs() -> u64 {
    60
}

fn default_tz_offset() -> i32 {
    3
}

fn default_watch_interval_secs() -> u64 {
    15
}

fn default_true() -> bool {
    true
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    /// Load configuration from a TOML file, with `SHOPWATCH__`-prefixed
    /// environment variables overriding file values.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(
                config::Environment::with_prefix("SHOPWATCH")
                    .separator("__"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
