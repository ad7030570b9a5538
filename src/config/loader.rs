/// Configuration loading from TOML file
use std::collections::HashSet;
use std::path::Path;

use crate::error::{FeedError, Result};
use crate::types::Config;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| FeedError::ConfigError(format!("Failed to read config file: {}", e)))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| FeedError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    // Validate token set
    if config.tokens.is_empty() {
        return Err(FeedError::ConfigError("No tokens configured".to_string()));
    }

    let mut names = HashSet::new();
    for token in &config.tokens {
        if token.address.trim().is_empty() {
            return Err(FeedError::ConfigError(format!(
                "Token {} has an empty address",
                token.name
            )));
        }
        if !names.insert(token.name.as_str()) {
            return Err(FeedError::ConfigError(format!(
                "Duplicate token name: {}",
                token.name
            )));
        }
    }

    // Validate intervals
    if config.backfill_window_secs == 0 || config.poll_interval_secs == 0 {
        return Err(FeedError::ConfigError(
            "backfill_window_secs and poll_interval_secs must be > 0".to_string(),
        ));
    }

    if config.barrier_warn_secs == 0 {
        return Err(FeedError::ConfigError("barrier_warn_secs must be > 0".to_string()));
    }

    // Validate transport
    if config.retry.backoff_factor < 0.0 {
        return Err(FeedError::ConfigError(format!(
            "Invalid retry.backoff_factor: {}",
            config.retry.backoff_factor
        )));
    }

    if config.rate_limit_per_sec == 0 {
        return Err(FeedError::ConfigError("rate_limit_per_sec must be > 0".to_string()));
    }

    display_zone(config)?;

    Ok(())
}

/// Parsed `display_timezone`; `None` means the process local zone
pub fn display_zone(config: &Config) -> Result<Option<chrono_tz::Tz>> {
    config
        .display_timezone
        .as_deref()
        .map(|tz| {
            tz.parse::<chrono_tz::Tz>()
                .map_err(|e| FeedError::ConfigError(format!("Invalid display_timezone: {}", e)))
        })
        .transpose()
}
