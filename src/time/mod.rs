pub mod calendar;

pub use calendar::{days_between, days_through, is_weekend, DayKind, TradingCalendar};
