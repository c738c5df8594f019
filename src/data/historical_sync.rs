/// Historical minute-bar synchronization, one day at a time
///
/// The cursor is the newest day file on disk. Each missing weekday from the day
/// after the cursor up to (but excluding) today is fetched and written before
/// the next one is requested, so an interrupted run keeps everything it stored.
/// Days that failed on an earlier run are taken from the store's failed-day
/// ledger and fetched again first.
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;

use super::day_store::DayStore;
use super::provider::BarProvider;
use crate::error::Result;
use crate::events::{CacheEvent, EventSink};
use crate::time::{days_between, DayKind, TradingCalendar};
use crate::types::Bar;

pub const DEFAULT_BOOTSTRAP_DAYS: i64 = 6;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub started_at: Option<DateTime<Utc>>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub days_retried: Vec<NaiveDate>,
    pub days_stored: Vec<NaiveDate>,
    pub days_empty: Vec<NaiveDate>,
    pub days_skipped: Vec<NaiveDate>,
    pub days_failed: Vec<NaiveDate>,
    pub bars_written: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    /// True when the cache was already up to date
    pub fn is_noop(&self) -> bool {
        self.start.is_none() && self.days_retried.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Work for one sync run, computed from a single directory scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    pub last_cached: Option<NaiveDate>,
    /// Every day currently in the failed-day ledger
    pub failed: BTreeSet<NaiveDate>,
    /// Ledger days behind the range start, ascending
    pub retries: Vec<NaiveDate>,
    /// Half-open `[start, today)` of days after the cursor
    pub range: Option<(NaiveDate, NaiveDate)>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.retries.is_empty() && self.range.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DayOutcome {
    Stored,
    Empty,
    Failed,
}

pub struct HistoricalDataSync {
    symbol: String,
    store: Arc<DayStore>,
    provider: Arc<dyn BarProvider>,
    calendar: TradingCalendar,
    bootstrap_days: i64,
    sink: Arc<dyn EventSink>,
}

impl HistoricalDataSync {
    pub fn new(
        symbol: String,
        store: Arc<DayStore>,
        provider: Arc<dyn BarProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            symbol,
            store,
            provider,
            calendar: TradingCalendar::weekdays(),
            bootstrap_days: DEFAULT_BOOTSTRAP_DAYS,
            sink,
        }
    }

    pub fn with_calendar(mut self, calendar: TradingCalendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn with_bootstrap_days(mut self, days: i64) -> Self {
        self.bootstrap_days = days.max(1);
        self
    }

    /// Days the next run would fetch for `today`
    pub fn plan(&self, today: NaiveDate) -> Result<SyncPlan> {
        let last_cached = self.store.last_cached_date()?;
        let start = match last_cached {
            Some(last) => last + Duration::days(1),
            None => today - Duration::days(self.bootstrap_days),
        };

        // failed days at or after `start` come up again inside the range
        let failed = self.store.failed_dates()?;
        let retries = failed
            .iter()
            .copied()
            .filter(|date| *date < start && *date < today)
            .collect();

        Ok(SyncPlan {
            last_cached,
            failed,
            retries,
            range: (start < today).then_some((start, today)),
        })
    }

    /// Bring the cache up to the day before `today`
    ///
    /// Only a failure to list the data directory is returned as an error; a
    /// failed fetch or write for one day is recorded in the report, remembered
    /// for the next run, and the run moves on to the next day.
    pub async fn sync(&self, today: NaiveDate) -> Result<SyncReport> {
        let mut report = SyncReport {
            started_at: Some(Utc::now()),
            ..SyncReport::default()
        };

        let plan = self.plan(today)?;
        if plan.is_empty() {
            self.sink.emit(&CacheEvent::AlreadySynced {
                last_cached: plan.last_cached,
                today,
            });
            return Ok(report);
        }

        let mut failed = plan.failed.clone();

        if !plan.retries.is_empty() {
            self.sink.emit(&CacheEvent::RetryScheduled {
                dates: plan.retries.clone(),
            });
            for &date in &plan.retries {
                if let Some(outcome) = self.visit_day(date, &mut report).await {
                    report.days_retried.push(date);
                    self.track_outcome(date, outcome, &mut failed, &mut report);
                } else {
                    // no longer a session day under the current calendar
                    self.track_outcome(date, DayOutcome::Empty, &mut failed, &mut report);
                }
            }
        }

        if let Some((start, end)) = plan.range {
            report.start = Some(start);
            report.end = Some(end);
            self.sink.emit(&CacheEvent::SyncStarted {
                symbol: self.symbol.clone(),
                start,
                end,
                bootstrap: plan.last_cached.is_none(),
            });

            for date in days_between(start, end) {
                if let Some(outcome) = self.visit_day(date, &mut report).await {
                    self.track_outcome(date, outcome, &mut failed, &mut report);
                }
            }
        }

        self.sink.emit(&CacheEvent::SyncCompleted {
            days_stored: report.days_stored.len(),
            days_empty: report.days_empty.len(),
            days_failed: report.days_failed.len(),
            bars_written: report.bars_written,
        });

        Ok(report)
    }

    /// Sync `date` if it is a session day, `None` when the calendar skips it
    async fn visit_day(&self, date: NaiveDate, report: &mut SyncReport) -> Option<DayOutcome> {
        match self.calendar.classify(date) {
            DayKind::Session => Some(self.sync_day(date, report).await),
            kind => {
                self.sink.emit(&CacheEvent::DaySkipped { date, kind });
                report.days_skipped.push(date);
                None
            }
        }
    }

    /// Keep the failed-day ledger in step with `outcome`
    fn track_outcome(
        &self,
        date: NaiveDate,
        outcome: DayOutcome,
        failed: &mut BTreeSet<NaiveDate>,
        report: &mut SyncReport,
    ) {
        let changed = match outcome {
            DayOutcome::Failed => failed.insert(date),
            DayOutcome::Stored | DayOutcome::Empty => failed.remove(&date),
        };
        if !changed {
            return;
        }

        if let Err(e) = self.store.save_failed_dates(failed) {
            report
                .errors
                .push(format!("failed-day ledger not saved after {}: {}", date, e));
        }
    }

    async fn sync_day(&self, date: NaiveDate, report: &mut SyncReport) -> DayOutcome {
        let day_start = date.and_time(NaiveTime::MIN);
        let day_end = day_start + Duration::days(1);

        self.sink.emit(&CacheEvent::DayFetching { date });

        let fetched = match self
            .provider
            .fetch_minute_bars(&self.symbol, day_start, day_end)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                let reason = format!("{} ({})", e, e.error_code());
                self.sink.emit(&CacheEvent::DayFetchFailed {
                    date,
                    reason: reason.clone(),
                });
                report.days_failed.push(date);
                report.errors.push(format!("{}: {}", date, reason));
                return DayOutcome::Failed;
            }
        };

        let bars = normalize_day(date, fetched);
        if bars.is_empty() {
            self.sink.emit(&CacheEvent::DayEmpty { date });
            report.days_empty.push(date);
            return DayOutcome::Empty;
        }

        match self.store.write(date, &bars) {
            Ok(written) => {
                self.sink.emit(&CacheEvent::DayStored {
                    date,
                    bars: written,
                });
                report.days_stored.push(date);
                report.bars_written += written;
                DayOutcome::Stored
            }
            Err(e) => {
                let reason = e.to_string();
                self.sink.emit(&CacheEvent::DayWriteFailed {
                    date,
                    reason: reason.clone(),
                });
                report.days_failed.push(date);
                report.errors.push(reason);
                DayOutcome::Failed
            }
        }
    }
}

/// Keep only `date`'s bars, ascending, first occurrence of each timestamp
fn normalize_day(date: NaiveDate, mut bars: Vec<Bar>) -> Vec<Bar> {
    bars.retain(|b| b.date() == date);
    // stable sort keeps provider order among equal timestamps
    bars.sort_by_key(|b| b.timestamp);
    bars.dedup_by_key(|b| b.timestamp);
    bars
}
