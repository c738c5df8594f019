/// Configuration loading from TOML file
use std::path::Path;

use chrono::NaiveDate;
use tracing::info;

use crate::error::{CacheError, Result};
use crate::types::Config;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CacheError::ConfigError(format!("Failed to read config file: {}", e)))?;

    parse_config(&content)
}

/// Load `path` if it exists, otherwise fall back to built-in defaults
pub fn load_config_or_default<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();
    if !path.exists() {
        info!("No config file at {} - using defaults", path.display());
        let config = Config::default();
        validate_config(&config)?;
        return Ok(config);
    }
    load_config(path)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| CacheError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.symbol.trim().is_empty() {
        return Err(CacheError::ConfigError("symbol is empty".to_string()));
    }

    if config.data_dir.trim().is_empty() {
        return Err(CacheError::ConfigError("data_dir is empty".to_string()));
    }

    if config.bootstrap_days < 1 {
        return Err(CacheError::ConfigError(format!(
            "Invalid bootstrap_days: {}",
            config.bootstrap_days
        )));
    }

    if config.requests_per_second == 0 {
        return Err(CacheError::ConfigError(
            "requests_per_second must be >= 1".to_string(),
        ));
    }

    config
        .exchange_timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|e| CacheError::ConfigError(format!("Invalid exchange_timezone: {}", e)))?;

    for holiday in &config.holidays {
        NaiveDate::parse_from_str(holiday, "%Y-%m-%d").map_err(|e| {
            CacheError::ConfigError(format!("Invalid holiday '{}': {}", holiday, e))
        })?;
    }

    Ok(())
}
