/// Bar aggregation from minute bars into coarser timeframes
use chrono::{DateTime, NaiveDateTime};
use std::fmt;
use std::str::FromStr;

use crate::error::{CacheError, Result};
use crate::types::Bar;

/// Width of an aggregation bucket
///
/// Parsed from strings such as `"5min"`, `"30T"`, `"1h"`, `"D"` or `"2D"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timeframe {
    Minutes(u32),
    Hours(u32),
    Days(u32),
}

impl Timeframe {
    pub fn duration_seconds(&self) -> i64 {
        match self {
            Timeframe::Minutes(n) => i64::from(*n) * 60,
            Timeframe::Hours(n) => i64::from(*n) * 3_600,
            Timeframe::Days(n) => i64::from(*n) * 86_400,
        }
    }

    /// Start of the bucket containing `timestamp`
    ///
    /// Buckets are counted from 1970-01-01 00:00, so the same minute always lands
    /// in the same bucket whatever range the caller asked for.
    pub fn get_bar_boundary(&self, timestamp: NaiveDateTime) -> NaiveDateTime {
        let step = self.duration_seconds();
        let secs = timestamp.and_utc().timestamp();
        let bucket = secs - secs.rem_euclid(step);
        DateTime::from_timestamp(bucket, 0)
            .map(|dt| dt.naive_utc())
            .unwrap_or(timestamp)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::Minutes(n) => write!(f, "{}min", n),
            Timeframe::Hours(n) => write!(f, "{}h", n),
            Timeframe::Days(n) => write!(f, "{}D", n),
        }
    }
}

impl FromStr for Timeframe {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        let raw = s.trim();
        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| CacheError::InvalidTimeframe(format!("'{}' has no unit", s)))?;
        let (count, unit) = raw.split_at(split);

        let count: u32 = if count.is_empty() {
            1
        } else {
            count
                .parse()
                .map_err(|_| CacheError::InvalidTimeframe(format!("'{}' count too large", s)))?
        };
        if count == 0 {
            return Err(CacheError::InvalidTimeframe(format!(
                "'{}' must have a positive width",
                s
            )));
        }

        match unit {
            "min" | "Min" | "T" | "minute" | "minutes" => Ok(Timeframe::Minutes(count)),
            "h" | "H" | "hour" | "hours" => Ok(Timeframe::Hours(count)),
            "D" | "d" | "day" | "days" => Ok(Timeframe::Days(count)),
            _ => Err(CacheError::InvalidTimeframe(format!(
                "'{}' has unknown unit '{}'",
                s, unit
            ))),
        }
    }
}

/// Bucket being accumulated
#[derive(Debug, Clone)]
struct PartialBar {
    timestamp: NaiveDateTime,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

impl PartialBar {
    fn new(timestamp: NaiveDateTime, first: &Bar) -> Self {
        PartialBar {
            timestamp,
            open: first.open,
            high: first.high,
            low: first.low,
            close: first.close,
            volume: first.volume,
        }
    }

    fn update(&mut self, bar: &Bar) {
        self.close = bar.close;
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.volume = self.volume.saturating_add(bar.volume);
    }

    fn to_bar(&self) -> Bar {
        Bar::new(
            self.timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        )
    }
}

/// Fold an ascending, de-duplicated minute series into `timeframe` buckets
///
/// open = first open, high = max high, low = min low, close = last close,
/// volume = sum. Buckets with no bars are never emitted.
pub fn resample(bars: &[Bar], timeframe: Timeframe) -> Vec<Bar> {
    let mut out = Vec::new();
    let mut current: Option<PartialBar> = None;

    for bar in bars {
        let boundary = timeframe.get_bar_boundary(bar.timestamp);
        if let Some(partial) = current.as_mut() {
            if partial.timestamp == boundary {
                partial.update(bar);
                continue;
            }
        }
        if let Some(done) = current.replace(PartialBar::new(boundary, bar)) {
            out.push(done.to_bar());
        }
    }

    if let Some(done) = current {
        out.push(done.to_bar());
    }

    out
}
