/// Core type definitions for the subgraph feed
use serde::{Deserialize, Serialize};

/// Seconds in one hourly period
pub const HOUR_SECONDS: i64 = 3600;

/// Seconds in the default backfill window (7 days)
pub const SEVEN_DAY_SECONDS: u64 = 604_800;

/// Token metadata as resolved from the subgraph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub name: String,
    pub symbol: String,
    pub total_supply: u128,
    pub volume_usd: f64,
    pub decimals: f64,
}

/// One hour of trading statistics for a token
///
/// Only hours with at least one trade exist upstream, so a missing hour is
/// an absence rather than a zeroed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlySample {
    pub period_start_unix: i64,
    pub open: f64,
    pub close: f64,
    pub high: f64,
    pub low: f64,
    pub price_usd: f64,
}

/// A token the collector tracks, keyed by a human readable name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedToken {
    pub name: String,
    pub address: String,
}

/// Transport retry policy for the subgraph client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_total")]
    pub total: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_status_forcelist")]
    pub status_forcelist: Vec<u16>,
}

impl RetryPolicy {
    pub fn is_retryable(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }

    /// Delay before retry number `attempt` (1-based): factor * 2^(attempt - 1)
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let secs = self.backoff_factor * f64::from(1u32 << exp);
        std::time::Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            total: default_retry_total(),
            backoff_factor: default_backoff_factor(),
            status_forcelist: default_status_forcelist(),
        }
    }
}

fn default_retry_total() -> u32 {
    5
}

fn default_backoff_factor() -> f64 {
    0.1
}

fn default_status_forcelist() -> Vec<u16> {
    vec![500, 502, 503, 504]
}

/// Process configuration (loaded from TOML)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Upstream
    #[serde(default = "default_subgraph_url")]
    pub subgraph_url: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    // Tracked tokens
    pub tokens: Vec<TrackedToken>,

    // Ingestion timing
    #[serde(default = "default_backfill_window_secs")]
    pub backfill_window_secs: u64,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_barrier_warn_secs")]
    pub barrier_warn_secs: u64,
    #[serde(default)]
    pub barrier_deadline_secs: Option<u64>,

    // Storage
    #[serde(default = "default_database_path")]
    pub database_path: String,

    // Read API
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// IANA zone for chart timestamps; process local time when unset
    #[serde(default)]
    pub display_timezone: Option<String>,

    // Logging
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            subgraph_url: default_subgraph_url(),
            retry: RetryPolicy::default(),
            request_timeout_secs: default_request_timeout_secs(),
            rate_limit_per_sec: default_rate_limit_per_sec(),
            tokens: Vec::new(),
            backfill_window_secs: default_backfill_window_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            barrier_warn_secs: default_barrier_warn_secs(),
            barrier_deadline_secs: None,
            database_path: default_database_path(),
            bind_address: default_bind_address(),
            display_timezone: None,
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

fn default_subgraph_url() -> String {
    "https://api.thegraph.com/subgraphs/name/uniswap/uniswap-v3".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_rate_limit_per_sec() -> u32 {
    5
}

fn default_backfill_window_secs() -> u64 {
    SEVEN_DAY_SECONDS
}

fn default_poll_interval_secs() -> u64 {
    HOUR_SECONDS as u64
}

fn default_barrier_warn_secs() -> u64 {
    300
}

fn default_database_path() -> String {
    "data/subgraph.db".to_string()
}

fn default_bind_address() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_log_level() -> String {
    "subgraph_feed=debug,info".to_string()
}
