/// Exchange calendar used to decide which days are worth a provider call
use chrono::{Datelike, Duration, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Why a calendar day does or does not get fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayKind {
    Session,
    Weekend,
    Holiday,
}

#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: HashSet<NaiveDate>,
}

impl TradingCalendar {
    /// Weekends only, no holidays
    pub fn weekdays() -> Self {
        Self::default()
    }

    pub fn with_holidays<I>(holidays: I) -> Self
    where
        I: IntoIterator<Item = NaiveDate>,
    {
        TradingCalendar {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn classify(&self, date: NaiveDate) -> DayKind {
        if is_weekend(date) {
            DayKind::Weekend
        } else if self.holidays.contains(&date) {
            DayKind::Holiday
        } else {
            DayKind::Session
        }
    }

    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }
}

pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Calendar days in the half-open range `[start, end)`
pub fn days_between(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    let len = (end - start).num_days().max(0);
    (0..len).map(move |offset| start + Duration::days(offset))
}

/// Calendar days in the closed range `[start, end]`
pub fn days_through(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    days_between(start, end + Duration::days(1))
}
