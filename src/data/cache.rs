/// Public entry point wiring the day store, synchronizer and composer
use chrono::{Local, NaiveDate};
use std::sync::Arc;
use tracing::debug;

use super::composer::Composer;
use super::day_store::DayStore;
use super::historical_sync::{HistoricalDataSync, SyncReport};
use super::provider::BarProvider;
use crate::error::{CacheError, Result};
use crate::events::EventSink;
use crate::time::TradingCalendar;
use crate::types::{Bar, Config};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub struct MarketDataCache {
    symbol: String,
    store: Arc<DayStore>,
    sync: HistoricalDataSync,
    composer: Composer,
}

impl MarketDataCache {
    /// Open the cache described by `config`, creating its data directory
    pub fn open(
        config: &Config,
        provider: Arc<dyn BarProvider>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let store = Arc::new(DayStore::open(&config.data_dir)?);
        let calendar = TradingCalendar::with_holidays(config.holiday_dates());
        debug!(
            "Opened cache for {} at {} ({} holidays)",
            config.symbol,
            store.data_dir().display(),
            calendar.holiday_count()
        );

        let sync = HistoricalDataSync::new(
            config.symbol.clone(),
            store.clone(),
            provider,
            sink.clone(),
        )
        .with_calendar(calendar)
        .with_bootstrap_days(config.bootstrap_days);
        let composer = Composer::new(store.clone(), sink);

        Ok(MarketDataCache {
            symbol: config.symbol.clone(),
            store,
            sync,
            composer,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Sync up to yesterday in local calendar time
    pub async fn sync(&self) -> Result<SyncReport> {
        self.sync_until(Local::now().date_naive()).await
    }

    pub async fn sync_until(&self, today: NaiveDate) -> Result<SyncReport> {
        self.sync.sync(today).await
    }

    /// Compose `timeframe` bars for the inclusive `YYYY-MM-DD` range
    pub fn query(&self, timeframe: &str, start: &str, end: &str) -> Result<Vec<Bar>> {
        let start = parse_date(start)?;
        let end = parse_date(end)?;
        self.composer.query(timeframe, start, end)
    }

    pub fn query_dates(
        &self,
        timeframe: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<Bar>> {
        self.composer.query(timeframe, start, end)
    }

    pub fn cached_dates(&self) -> Result<Vec<NaiveDate>> {
        self.store.cached_dates()
    }

    /// Days the next sync will fetch again after an earlier failure
    pub fn failed_dates(&self) -> Result<Vec<NaiveDate>> {
        Ok(self.store.failed_dates()?.into_iter().collect())
    }
}

pub fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|e| {
        CacheError::InvalidParameter(format!(
            "Invalid date '{}' (expected YYYY-MM-DD): {}",
            raw, e
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::mock_provider::MockProvider;
    use crate::events::{CacheEvent, MemorySink};
    use chrono::Duration;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn minutes(date: NaiveDate, count: u32, price: f64) -> Vec<Bar> {
        (0..count)
            .map(|i| {
                let ts = date.and_hms_opt(10, 0, 0).unwrap() + Duration::minutes(i64::from(i));
                Bar::new(ts, price, price + 1.0, price - 1.0, price + 0.5, 100)
            })
            .collect()
    }

    fn open_cache(
        dir: &std::path::Path,
        provider: MockProvider,
    ) -> (MarketDataCache, Arc<MemorySink>) {
        let config = Config {
            data_dir: dir.join("cache").to_string_lossy().into_owned(),
            ..Config::default()
        };
        let sink = Arc::new(MemorySink::new());
        let cache = MarketDataCache::open(&config, Arc::new(provider), sink.clone()).unwrap();
        (cache, sink)
    }

    #[tokio::test]
    async fn test_sync_then_query() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockProvider::new()
            .with_day(d(5), minutes(d(5), 30, 10.0))
            .with_day(d(6), minutes(d(6), 30, 20.0));
        let (cache, _sink) = open_cache(dir.path(), provider);

        // today 2025-06-09 (Mon): bootstrap window starts on Tue 06-03
        let report = cache.sync_until(d(9)).await.unwrap();
        assert_eq!(report.days_stored, vec![d(5), d(6)]);
        assert_eq!(cache.cached_dates().unwrap(), vec![d(5), d(6)]);

        let half_hours = cache.query("30min", "2025-06-05", "2025-06-06").unwrap();
        assert_eq!(half_hours.len(), 2);
        assert_eq!(half_hours[0].volume, 3_000);
        assert_eq!(half_hours[1].open, 20.0);

        let daily = cache.query("D", "2025-06-01", "2025-06-30").unwrap();
        assert_eq!(daily.len(), 2);
    }

    #[tokio::test]
    async fn test_second_sync_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let provider = MockProvider::new().with_day(d(6), minutes(d(6), 5, 1.0));
        let (cache, sink) = open_cache(dir.path(), provider);

        cache.sync_until(d(9)).await.unwrap();
        let again = cache.sync_until(d(9)).await.unwrap();

        assert!(again.is_noop());
        assert!(matches!(
            sink.events().last(),
            Some(CacheEvent::AlreadySynced { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_day_is_reported_until_it_syncs() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(
            MockProvider::new()
                .with_day(d(5), minutes(d(5), 5, 1.0))
                .with_day(d(6), minutes(d(6), 5, 1.0))
                .failing_on(d(5)),
        );
        let config = Config {
            data_dir: dir.path().to_string_lossy().into_owned(),
            ..Config::default()
        };
        let cache =
            MarketDataCache::open(&config, provider.clone(), Arc::new(MemorySink::new())).unwrap();

        cache.sync_until(d(9)).await.unwrap();
        assert_eq!(cache.failed_dates().unwrap(), vec![d(5)]);

        provider.heal(d(5));
        cache.sync_until(d(10)).await.unwrap();

        assert!(cache.failed_dates().unwrap().is_empty());
        assert_eq!(cache.cached_dates().unwrap(), vec![d(5), d(6)]);
    }

    #[test]
    fn test_malformed_dates_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (cache, _sink) = open_cache(dir.path(), MockProvider::new());

        for (start, end) in [("2025-13-01", "2025-06-02"), ("2025-06-01", "June 2")] {
            let err = cache.query("5min", start, end).unwrap_err();
            assert!(matches!(err, CacheError::InvalidParameter(_)), "{start} {end}");
        }
        assert!(matches!(
            cache.query("fortnight", "2025-06-01", "2025-06-02").unwrap_err(),
            CacheError::InvalidTimeframe(_)
        ));
    }

    #[test]
    fn test_open_fails_on_unusable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();

        let config = Config {
            data_dir: blocker.join("cache").to_string_lossy().into_owned(),
            ..Config::default()
        };
        let result = MarketDataCache::open(
            &config,
            Arc::new(MockProvider::new()),
            Arc::new(MemorySink::new()),
        );

        assert!(matches!(result, Err(CacheError::ConfigError(_))));
    }
}
