/// Multi-day composition: day stores -> one minute series -> timeframe bars
use chrono::NaiveDate;
use std::collections::HashSet;
use std::sync::Arc;

use super::bar_aggregator::{resample, Timeframe};
use super::day_store::DayStore;
use crate::error::Result;
use crate::events::{CacheEvent, EventSink};
use crate::time::days_through;
use crate::types::Bar;

pub struct Composer {
    store: Arc<DayStore>,
    sink: Arc<dyn EventSink>,
}

impl Composer {
    pub fn new(store: Arc<DayStore>, sink: Arc<dyn EventSink>) -> Self {
        Self { store, sink }
    }

    /// Minute bars for `[start, end]` inclusive, ascending, one per timestamp
    ///
    /// Days are loaded in calendar order; when two stores hold the same
    /// timestamp the one loaded first wins. Unreadable days are skipped.
    pub fn load_minute_series(&self, start: NaiveDate, end: NaiveDate) -> Vec<Bar> {
        let mut seen = HashSet::new();
        let mut series = Vec::new();

        for date in days_through(start, end) {
            let bars = match self.store.read(date) {
                Ok(bars) => bars,
                Err(e) => {
                    self.sink.emit(&CacheEvent::StoreReadFailed {
                        date,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            series.extend(bars.into_iter().filter(|b| seen.insert(b.timestamp)));
        }

        series.sort_by_key(|b| b.timestamp);
        series
    }

    /// Compose `[start, end]` into `timeframe` bars
    ///
    /// Only a malformed timeframe is an error. A reversed or uncached range
    /// gives an empty result.
    pub fn query(&self, timeframe: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<Bar>> {
        let tf: Timeframe = timeframe.parse()?;
        self.compose(tf, start, end)
    }

    pub fn compose(
        &self,
        timeframe: Timeframe,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>> {
        self.sink.emit(&CacheEvent::QueryStarted {
            timeframe: timeframe.to_string(),
            start,
            end,
        });

        let minutes = self.load_minute_series(start, end);
        if minutes.is_empty() {
            self.sink.emit(&CacheEvent::QueryEmpty { start, end });
            return Ok(Vec::new());
        }

        let bars = resample(&minutes, timeframe);
        self.sink.emit(&CacheEvent::QueryCompleted {
            timeframe: timeframe.to_string(),
            minute_bars: minutes.len(),
            buckets: bars.len(),
        });

        Ok(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::events::MemorySink;
    use chrono::NaiveDateTime;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn at(day: u32, h: u32, m: u32) -> NaiveDateTime {
        d(day).and_hms_opt(h, m, 0).unwrap()
    }

    fn bar(ts: NaiveDateTime, o: f64, h: f64, l: f64, c: f64, v: u64) -> Bar {
        Bar::new(ts, o, h, l, c, v)
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<DayStore>,
        sink: Arc<MemorySink>,
        composer: Composer,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DayStore::open(dir.path()).unwrap());
        let sink = Arc::new(MemorySink::new());
        let composer = Composer::new(store.clone(), sink.clone());
        Fixture {
            _dir: dir,
            store,
            sink,
            composer,
        }
    }

    #[test]
    fn test_aggregates_five_minutes() {
        let f = fixture();
        f.store
            .write(
                d(2),
                &[
                    bar(at(2, 9, 0), 10.0, 10.5, 9.8, 10.2, 100),
                    bar(at(2, 9, 1), 10.2, 10.3, 10.0, 10.1, 50),
                    bar(at(2, 9, 2), 10.1, 10.4, 10.1, 10.3, 75),
                    bar(at(2, 9, 3), 10.3, 10.6, 10.2, 10.5, 60),
                    bar(at(2, 9, 4), 10.5, 10.5, 10.3, 10.4, 40),
                ],
            )
            .unwrap();

        let out = f.composer.query("5min", d(2), d(2)).unwrap();

        assert_eq!(out, vec![bar(at(2, 9, 0), 10.0, 10.6, 9.8, 10.4, 325)]);
        assert!(matches!(
            f.sink.events().last(),
            Some(CacheEvent::QueryCompleted {
                minute_bars: 5,
                buckets: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_first_loaded_store_wins_on_duplicates() {
        let f = fixture();
        // the 2nd's store carries a stray bar stamped on the 3rd
        f.store
            .write(
                d(2),
                &[
                    bar(at(2, 10, 0), 1.0, 1.0, 1.0, 1.0, 1),
                    bar(at(3, 10, 0), 7.0, 7.0, 7.0, 7.0, 7),
                ],
            )
            .unwrap();
        f.store
            .write(
                d(3),
                &[
                    bar(at(3, 10, 0), 9.0, 9.0, 9.0, 9.0, 9),
                    bar(at(3, 10, 1), 9.5, 9.5, 9.5, 9.5, 9),
                ],
            )
            .unwrap();

        let series = f.composer.load_minute_series(d(2), d(3));

        let stamps: Vec<_> = series.iter().map(|b| b.timestamp).collect();
        assert_eq!(stamps, vec![at(2, 10, 0), at(3, 10, 0), at(3, 10, 1)]);
        assert_eq!(series[1].close, 7.0);
    }

    #[test]
    fn test_range_is_inclusive_and_spans_days() {
        let f = fixture();
        for day in [2, 3, 4] {
            f.store
                .write(d(day), &[bar(at(day, 10, 0), 5.0, 6.0, 4.0, 5.5, 10)])
                .unwrap();
        }

        let daily = f.composer.query("D", d(2), d(3)).unwrap();

        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].timestamp, at(2, 0, 0));
        assert_eq!(daily[1].timestamp, at(3, 0, 0));
    }

    #[test]
    fn test_empty_range_is_not_an_error() {
        let f = fixture();

        assert!(f.composer.query("30min", d(2), d(6)).unwrap().is_empty());
        assert!(f.composer.query("30min", d(6), d(2)).unwrap().is_empty());
        assert!(f
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, CacheEvent::QueryEmpty { .. })));
    }

    #[test]
    fn test_corrupt_day_is_skipped() {
        let f = fixture();
        f.store
            .write(d(2), &[bar(at(2, 10, 0), 1.0, 1.0, 1.0, 1.0, 1)])
            .unwrap();
        std::fs::write(f.store.path_for(d(3)), b"not a database").unwrap();

        let out = f.composer.query("1h", d(2), d(3)).unwrap();

        assert_eq!(out.len(), 1);
        assert!(f
            .sink
            .events()
            .iter()
            .any(|e| matches!(e, CacheEvent::StoreReadFailed { date, .. } if *date == d(3))));
    }

    #[test]
    fn test_invalid_timeframe_is_returned() {
        let f = fixture();
        let err = f.composer.query("5parsecs", d(2), d(3)).unwrap_err();

        assert!(matches!(err, CacheError::InvalidTimeframe(_)));
        assert!(f.sink.events().is_empty());
    }
}
