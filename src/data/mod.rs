pub mod bar_aggregator;
pub mod cache;
pub mod composer;
pub mod day_store;
pub mod historical_sync;
pub mod mock_provider;
pub mod provider;

pub use bar_aggregator::{resample, Timeframe};
pub use cache::{parse_date, MarketDataCache};
pub use composer::Composer;
pub use day_store::DayStore;
pub use historical_sync::{HistoricalDataSync, SyncPlan, SyncReport};
pub use mock_provider::{FetchCall, MockProvider};
pub use provider::{BarProvider, YahooProvider};
