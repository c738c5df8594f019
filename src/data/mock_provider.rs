/// In-memory provider for tests and offline runs
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use super::provider::BarProvider;
use crate::error::{CacheError, Result};
use crate::types::Bar;

/// One recorded provider call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchCall {
    pub symbol: String,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Serves canned minute bars by calendar day and records every call
///
/// Days with no canned bars return an empty result. Days marked as failing
/// return a provider error.
#[derive(Debug, Default)]
pub struct MockProvider {
    days: Mutex<HashMap<NaiveDate, Vec<Bar>>>,
    failing: Mutex<HashSet<NaiveDate>>,
    calls: Mutex<Vec<FetchCall>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_day(self, date: NaiveDate, bars: Vec<Bar>) -> Self {
        self.set_day(date, bars);
        self
    }

    pub fn failing_on(self, date: NaiveDate) -> Self {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(date);
        }
        self
    }

    pub fn set_day(&self, date: NaiveDate, bars: Vec<Bar>) {
        if let Ok(mut days) = self.days.lock() {
            days.insert(date, bars);
        }
    }

    pub fn heal(&self, date: NaiveDate) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(&date);
        }
    }

    pub fn calls(&self) -> Vec<FetchCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Days that were asked for, in call order
    pub fn fetched_days(&self) -> Vec<NaiveDate> {
        self.calls().iter().map(|c| c.start.date()).collect()
    }
}

#[async_trait]
impl BarProvider for MockProvider {
    async fn fetch_minute_bars(
        &self,
        symbol: &str,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(FetchCall {
                symbol: symbol.to_string(),
                start,
                end,
            });
        }

        let date = start.date();
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(&date))
            .unwrap_or(false);
        if failing {
            return Err(CacheError::ProviderError(format!(
                "scripted failure for {}",
                date
            )));
        }

        let days = self
            .days
            .lock()
            .map_err(|_| CacheError::Other("mock provider lock poisoned".to_string()))?;
        Ok(days.get(&date).cloned().unwrap_or_default())
    }
}
