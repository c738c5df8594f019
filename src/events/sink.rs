/// Event sinks - where the cache reports what it did
///
/// Core components hold an `Arc<dyn EventSink>` handed to them at construction
/// and never configure logging themselves.
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use super::types::{CacheEvent, EventRecord};
use crate::error::Result;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: &CacheEvent);
}

/// Renders events as `tracing` lines
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &CacheEvent) {
        match event {
            CacheEvent::SyncStarted {
                symbol,
                start,
                end,
                bootstrap,
            } => {
                if *bootstrap {
                    info!("No local data for {}. Fetching from {}", symbol, start);
                }
                info!("Syncing {} minute bars for [{}, {})", symbol, start, end);
            }
            CacheEvent::AlreadySynced { last_cached, today } => {
                info!(
                    "Historical data already synced up to {} (today {})",
                    last_cached.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                    today
                );
            }
            CacheEvent::RetryScheduled { dates } => {
                info!(
                    "Retrying {} previously failed days: {:?}",
                    dates.len(),
                    dates
                );
            }
            CacheEvent::DaySkipped { date, kind } => {
                info!("Skipping {} ({:?})", date, kind);
            }
            CacheEvent::DayFetching { date } => {
                info!("Downloading minute bars for {}", date);
            }
            CacheEvent::DayStored { date, bars } => {
                info!("{} bars saved for {}", bars, date);
            }
            CacheEvent::DayEmpty { date } => {
                info!("No data returned for {} - leaving it unpopulated", date);
            }
            CacheEvent::DayFetchFailed { date, reason } => {
                warn!("Fetch failed for {}: {}", date, reason);
            }
            CacheEvent::DayWriteFailed { date, reason } => {
                warn!("Write failed for {}: {}", date, reason);
            }
            CacheEvent::SyncCompleted {
                days_stored,
                days_empty,
                days_failed,
                bars_written,
            } => {
                info!(
                    "Sync finished: {} days stored ({} bars), {} empty, {} failed",
                    days_stored, bars_written, days_empty, days_failed
                );
            }
            CacheEvent::QueryStarted {
                timeframe,
                start,
                end,
            } => {
                info!("Loading {} to {} to compose '{}' bars", start, end, timeframe);
            }
            CacheEvent::StoreReadFailed { date, reason } => {
                warn!("Failed to read day store {}: {}", date, reason);
            }
            CacheEvent::QueryEmpty { start, end } => {
                warn!("No minute data found between {} and {}", start, end);
            }
            CacheEvent::QueryCompleted {
                timeframe,
                minute_bars,
                buckets,
            } => {
                info!(
                    "Composed {} minute bars into {} '{}' bars",
                    minute_bars, buckets, timeframe
                );
            }
        }
    }
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &CacheEvent) {}
}

/// Keeps events in memory, in emission order
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<CacheEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<CacheEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: &CacheEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

/// Appends one JSON object per event to a file
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Event log opened at {}", path.display());

        Ok(JsonlSink {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read back every well-formed record in the log
    pub fn replay<P: AsRef<Path>>(path: P) -> Result<Vec<EventRecord>> {
        let reader = BufReader::new(File::open(path)?);
        let mut records = Vec::new();
        for line in reader.lines() {
            if let Ok(record) = serde_json::from_str::<EventRecord>(&line?) {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn append(&self, event: &CacheEvent) -> Result<()> {
        let json_line = serde_json::to_string(&EventRecord::new(event.clone()))?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| crate::error::CacheError::Other("event log lock poisoned".to_string()))?;
        writeln!(file, "{}", json_line)?;
        file.flush()?;
        Ok(())
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &CacheEvent) {
        if let Err(e) = self.append(event) {
            warn!(
                "Failed to append {} to {}: {}",
                event.as_str(),
                self.path.display(),
                e
            );
        }
    }
}

/// Forwards every event to each inner sink
#[derive(Default, Clone)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &CacheEvent) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}
