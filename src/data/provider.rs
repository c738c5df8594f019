/// Market data provider adapter
use async_trait::async_trait;
use chrono::{LocalResult, NaiveDateTime, TimeZone};
use chrono_tz::Tz;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::error::{CacheError, Result};
use crate::types::{Bar, Config};
use crate::utils::RateLimiter;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) barcache/0.1";

/// Source of minute bars for one symbol
///
/// `start` and `end` are naive exchange wall-clock times, `end` exclusive.
/// Returned bars carry naive exchange wall-clock timestamps, ascending.
#[async_trait]
pub trait BarProvider: Send + Sync {
    async fn fetch_minute_bars(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>>;
}

/// Yahoo Finance v8 chart endpoint at 1-minute interval
pub struct YahooProvider {
    client: reqwest::Client,
    base_url: String,
    exchange_tz: Tz,
    limiter: RateLimiter,
}

impl YahooProvider {
    pub fn new(
        base_url: &str,
        exchange_tz: Tz,
        timeout: Duration,
        requests_per_second: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?;

        Ok(YahooProvider {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            exchange_tz,
            limiter: RateLimiter::new(requests_per_second),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let tz: Tz = config
            .exchange_timezone
            .parse()
            .map_err(|e| CacheError::ConfigError(format!("Invalid exchange_timezone: {}", e)))?;

        Self::new(
            &config.provider_base_url,
            tz,
            Duration::from_secs(config.request_timeout_sec),
            config.requests_per_second,
        )
    }

    fn to_epoch(&self, local: NaiveDateTime) -> i64 {
        match self.exchange_tz.from_local_datetime(&local) {
            LocalResult::Single(dt) => dt.timestamp(),
            LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
            // Wall-clock gap at a DST switch; Yahoo only needs a bound
            LocalResult::None => local.and_utc().timestamp(),
        }
    }
}

#[async_trait]
impl BarProvider for YahooProvider {
    async fn fetch_minute_bars(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>> {
        let period1 = self.to_epoch(start);
        let period2 = self.to_epoch(end);

        self.limiter.acquire().await;

        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol);
        debug!("Fetching 1m chart for {} [{}, {})", symbol, start, end);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
                ("interval", "1m".to_string()),
                ("includePrePost", "false".to_string()),
                ("events", "div,splits".to_string()),
            ])
            .header("Accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        let bars = parse_chart_response(&body, self.exchange_tz).map_err(|e| match e {
            CacheError::DeserializationError(_) if !status.is_success() => {
                CacheError::ProviderError(format!("HTTP {} for {}", status, symbol))
            }
            other => other,
        })?;

        let bars: Vec<Bar> = bars
            .into_iter()
            .filter(|b| b.timestamp >= start && b.timestamp < end)
            .collect();

        debug!("Fetched {} minute bars for {}", bars.len(), symbol);
        Ok(bars)
    }
}

#[derive(Debug, Deserialize)]
struct ChartEnvelope {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Option<Indicators>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    exchange_timezone_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Default, Deserialize)]
struct Quote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

fn field(series: &[Option<f64>], idx: usize) -> Option<f64> {
    series.get(idx).copied().flatten()
}

/// Turn a chart payload into naive exchange-local minute bars
///
/// Rows missing any price are dropped. A payload with no timestamps is an
/// empty session, not an error.
pub(crate) fn parse_chart_response(body: &str, fallback_tz: Tz) -> Result<Vec<Bar>> {
    let envelope: ChartEnvelope = serde_json::from_str(body)?;

    if let Some(err) = envelope.chart.error {
        return Err(CacheError::ProviderError(format!(
            "{}: {}",
            err.code,
            err.description.unwrap_or_default()
        )));
    }

    let Some(result) = envelope.chart.result.and_then(|r| r.into_iter().next()) else {
        return Ok(Vec::new());
    };

    let tz = result
        .meta
        .and_then(|m| m.exchange_timezone_name)
        .and_then(|name| name.parse::<Tz>().ok())
        .unwrap_or(fallback_tz);

    let timestamps = result.timestamp.unwrap_or_default();
    let quote = result
        .indicators
        .and_then(|i| i.quote.into_iter().next())
        .unwrap_or_default();

    let mut bars = Vec::with_capacity(timestamps.len());
    for (idx, epoch) in timestamps.iter().enumerate() {
        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(&quote.open, idx),
            field(&quote.high, idx),
            field(&quote.low, idx),
            field(&quote.close, idx),
        ) else {
            continue;
        };

        let Some(utc) = chrono::DateTime::from_timestamp(*epoch, 0) else {
            return Err(CacheError::InvalidBarData(format!(
                "timestamp {} out of range",
                epoch
            )));
        };
        let volume = field(&quote.volume, idx).unwrap_or(0.0).max(0.0).round() as u64;

        bars.push(Bar::new(
            utc.with_timezone(&tz).naive_local(),
            open,
            high,
            low,
            close,
            volume,
        ));
    }

    bars.sort_by_key(|b| b.timestamp);
    Ok(bars)
}
