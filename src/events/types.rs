/// Events reported by the synchronizer and composer
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::time::DayKind;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CacheEvent {
    // Synchronization
    SyncStarted {
        symbol: String,
        start: NaiveDate,
        end: NaiveDate,
        bootstrap: bool,
    },
    AlreadySynced {
        last_cached: Option<NaiveDate>,
        today: NaiveDate,
    },
    RetryScheduled {
        dates: Vec<NaiveDate>,
    },
    DaySkipped {
        date: NaiveDate,
        kind: DayKind,
    },
    DayFetching {
        date: NaiveDate,
    },
    DayStored {
        date: NaiveDate,
        bars: usize,
    },
    DayEmpty {
        date: NaiveDate,
    },
    DayFetchFailed {
        date: NaiveDate,
        reason: String,
    },
    DayWriteFailed {
        date: NaiveDate,
        reason: String,
    },
    SyncCompleted {
        days_stored: usize,
        days_empty: usize,
        days_failed: usize,
        bars_written: usize,
    },

    // Composition
    QueryStarted {
        timeframe: String,
        start: NaiveDate,
        end: NaiveDate,
    },
    StoreReadFailed {
        date: NaiveDate,
        reason: String,
    },
    QueryEmpty {
        start: NaiveDate,
        end: NaiveDate,
    },
    QueryCompleted {
        timeframe: String,
        minute_bars: usize,
        buckets: usize,
    },
}

impl CacheEvent {
    pub fn as_str(&self) -> &str {
        match self {
            CacheEvent::SyncStarted { .. } => "SYNC_STARTED",
            CacheEvent::AlreadySynced { .. } => "ALREADY_SYNCED",
            CacheEvent::RetryScheduled { .. } => "RETRY_SCHEDULED",
            CacheEvent::DaySkipped { .. } => "DAY_SKIPPED",
            CacheEvent::DayFetching { .. } => "DAY_FETCHING",
            CacheEvent::DayStored { .. } => "DAY_STORED",
            CacheEvent::DayEmpty { .. } => "DAY_EMPTY",
            CacheEvent::DayFetchFailed { .. } => "DAY_FETCH_FAILED",
            CacheEvent::DayWriteFailed { .. } => "DAY_WRITE_FAILED",
            CacheEvent::SyncCompleted { .. } => "SYNC_COMPLETED",
            CacheEvent::QueryStarted { .. } => "QUERY_STARTED",
            CacheEvent::StoreReadFailed { .. } => "STORE_READ_FAILED",
            CacheEvent::QueryEmpty { .. } => "QUERY_EMPTY",
            CacheEvent::QueryCompleted { .. } => "QUERY_COMPLETED",
        }
    }

    /// Events that mean some day's data did not make it through
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            CacheEvent::DayFetchFailed { .. }
                | CacheEvent::DayWriteFailed { .. }
                | CacheEvent::StoreReadFailed { .. }
        )
    }
}

/// One line of the JSONL audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub timestamp_ms: i64,
    #[serde(flatten)]
    pub event: CacheEvent,
}

impl EventRecord {
    pub fn new(event: CacheEvent) -> Self {
        let now = Utc::now();
        EventRecord {
            timestamp: now,
            timestamp_ms: now.timestamp_millis(),
            event,
        }
    }
}
