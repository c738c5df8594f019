/// Core type definitions for the bar cache
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// OHLCV Bar data structure
///
/// Timestamps are naive exchange wall-clock times. A minute bar is keyed by the
/// start of its minute; an aggregated bar by the start of its bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    pub fn new(
        timestamp: NaiveDateTime,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: u64,
    ) -> Self {
        Bar {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Calendar day the bar belongs to
    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }
}

/// Configuration for the bar cache
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    // Instrument
    pub symbol: String,

    // Storage
    pub data_dir: String,

    // Synchronization
    pub bootstrap_days: i64,
    pub holidays: Vec<String>,

    // Provider
    pub exchange_timezone: String,
    pub provider_base_url: String,
    pub request_timeout_sec: u64,
    pub requests_per_second: u32,

    // Logging
    pub log_level: String,
    pub event_log_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            symbol: "BOVA11.SA".to_string(),
            data_dir: "market_data".to_string(),
            bootstrap_days: 6,
            holidays: Vec::new(),
            exchange_timezone: "America/Sao_Paulo".to_string(),
            provider_base_url: "https://query1.finance.yahoo.com".to_string(),
            request_timeout_sec: 30,
            requests_per_second: 2,
            log_level: "info".to_string(),
            event_log_path: None,
        }
    }
}

impl Config {
    /// Parsed holiday list; entries that fail to parse are rejected at load time
    pub fn holiday_dates(&self) -> Vec<NaiveDate> {
        self.holidays
            .iter()
            .filter_map(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .collect()
    }
}
