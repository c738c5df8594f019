pub mod sink;
pub mod types;

pub use sink::{EventSink, FanoutSink, JsonlSink, MemorySink, NullSink, TracingSink};
pub use types::{CacheEvent, EventRecord};
