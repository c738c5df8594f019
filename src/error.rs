/// Centralized error types for the bar cache
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid timeframe: {0}")]
    InvalidTimeframe(String),

    // Provider Errors
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Invalid bar data: {0}")]
    InvalidBarData(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    // Store Errors
    #[error("SQLite error: {0}")]
    StoreError(#[from] rusqlite::Error),

    #[error("Day store {date} unreadable: {reason}")]
    StoreReadFailed { date: NaiveDate, reason: String },

    #[error("Day store {date} write failed: {reason}")]
    StoreWriteFailed { date: NaiveDate, reason: String },

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

impl CacheError {
    /// Failures local to a single day; the surrounding sync or query carries on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CacheError::HttpError(_)
                | CacheError::ProviderError(_)
                | CacheError::InvalidBarData(_)
                | CacheError::DeserializationError(_)
                | CacheError::StoreReadFailed { .. }
                | CacheError::StoreWriteFailed { .. }
        )
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            CacheError::ConfigError(_) => "CFG_001",
            CacheError::InvalidParameter(_) => "CFG_002",
            CacheError::InvalidTimeframe(_) => "CFG_003",
            CacheError::HttpError(_) => "NET_001",
            CacheError::ProviderError(_) => "NET_002",
            CacheError::InvalidBarData(_) => "DATA_001",
            CacheError::DeserializationError(_) => "DATA_002",
            CacheError::StoreError(_) => "STORE_001",
            CacheError::StoreReadFailed { .. } => "STORE_002",
            CacheError::StoreWriteFailed { .. } => "STORE_003",
            CacheError::FileError(_) => "FILE_001",
            CacheError::Other(_) => "GEN_001",
        }
    }
}
