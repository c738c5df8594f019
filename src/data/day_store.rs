/// Per-day SQLite bar storage
///
/// Every calendar day lives in its own `YYYY-MM-DD.sqlite3` file under the data
/// directory. A file is only ever moved into place after its transaction has
/// committed, so the presence of a day file means that day is complete. The
/// synchronizer relies on this to derive its cursor from a directory listing.
///
/// Days whose fetch or write failed are listed in `failed_days.json` next to the
/// day files so the next sync can try them again even after the cursor moved on.
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use rusqlite::{params, Connection, OpenFlags};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{CacheError, Result};
use crate::types::Bar;

const TABLE_NAME: &str = "tf_1m";
const DB_EXTENSION: &str = "sqlite3";
const TMP_SUFFIX: &str = "tmp";
const DATE_FORMAT: &str = "%Y-%m-%d";
const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FAILED_LEDGER: &str = "failed_days.json";

#[derive(Debug, Clone)]
pub struct DayStore {
    data_dir: PathBuf,
}

impl DayStore {
    /// Open (and create if needed) the cache directory
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir).map_err(|e| {
            CacheError::ConfigError(format!(
                "Cannot create data directory {}: {}",
                data_dir.display(),
                e
            ))
        })?;

        Ok(DayStore { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Path of the store file for a specific date
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.data_dir
            .join(format!("{}.{}", date.format(DATE_FORMAT), DB_EXTENSION))
    }

    fn tmp_path_for(&self, date: NaiveDate) -> PathBuf {
        self.data_dir.join(format!(
            "{}.{}.{}",
            date.format(DATE_FORMAT),
            DB_EXTENSION,
            TMP_SUFFIX
        ))
    }

    pub fn exists(&self, date: NaiveDate) -> bool {
        self.path_for(date).is_file()
    }

    /// Replace the whole content of `date`'s store with `bars`
    ///
    /// Rows are keyed by timestamp; on a duplicate key the first row wins.
    pub fn write(&self, date: NaiveDate, bars: &[Bar]) -> Result<usize> {
        let tmp_path = self.tmp_path_for(date);
        if tmp_path.exists() {
            std::fs::remove_file(&tmp_path)?;
        }

        let written = write_table(&tmp_path, bars).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            CacheError::StoreWriteFailed {
                date,
                reason: e.to_string(),
            }
        })?;

        let final_path = self.path_for(date);
        std::fs::rename(&tmp_path, &final_path).map_err(|e| CacheError::StoreWriteFailed {
            date,
            reason: format!("rename into {} failed: {}", final_path.display(), e),
        })?;

        debug!("Wrote {} bars to {}", written, final_path.display());
        Ok(written)
    }

    /// Read all bars for `date`, ascending by timestamp
    ///
    /// A missing file is an empty day. An unreadable file is reported as
    /// `StoreReadFailed` so callers can skip just that day.
    pub fn read(&self, date: NaiveDate) -> Result<Vec<Bar>> {
        let path = self.path_for(date);
        if !path.is_file() {
            return Ok(Vec::new());
        }

        read_table(&path).map_err(|e| CacheError::StoreReadFailed {
            date,
            reason: e.to_string(),
        })
    }

    /// Dates that have a store on disk, ascending
    pub fn cached_dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for entry in std::fs::read_dir(&self.data_dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(DB_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, DATE_FORMAT) {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }

    /// Most recent cached day (the sync cursor)
    pub fn last_cached_date(&self) -> Result<Option<NaiveDate>> {
        Ok(self.cached_dates()?.into_iter().max())
    }

    fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(FAILED_LEDGER)
    }

    /// Days whose last sync attempt failed
    ///
    /// An unreadable ledger is logged and treated as empty.
    pub fn failed_dates(&self) -> Result<BTreeSet<NaiveDate>> {
        let path = self.ledger_path();
        if !path.is_file() {
            return Ok(BTreeSet::new());
        }

        let raw = std::fs::read_to_string(&path)?;
        match serde_json::from_str(&raw) {
            Ok(dates) => Ok(dates),
            Err(e) => {
                warn!("Ignoring unreadable retry ledger {}: {}", path.display(), e);
                Ok(BTreeSet::new())
            }
        }
    }

    /// Replace the failed-day ledger; an empty set removes it
    pub fn save_failed_dates(&self, dates: &BTreeSet<NaiveDate>) -> Result<()> {
        let path = self.ledger_path();
        if dates.is_empty() {
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
            return Ok(());
        }

        let tmp_path = self.data_dir.join(format!("{}.{}", FAILED_LEDGER, TMP_SUFFIX));
        std::fs::write(&tmp_path, serde_json::to_vec_pretty(dates)?)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }
}

fn ensure_table(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {TABLE_NAME} (
             Datetime TEXT PRIMARY KEY,
             Open     REAL,
             High     REAL,
             Low      REAL,
             Close    REAL,
             Volume   INTEGER
         );"
    ))
}

fn write_table(path: &Path, bars: &[Bar]) -> Result<usize> {
    let mut conn = Connection::open(path)?;
    ensure_table(&conn)?;

    let tx = conn.transaction()?;
    tx.execute(&format!("DELETE FROM {TABLE_NAME}"), [])?;

    let mut written = 0;
    {
        let mut stmt = tx.prepare(&format!(
            "INSERT OR IGNORE INTO {TABLE_NAME} (Datetime, Open, High, Low, Close, Volume) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)"
        ))?;
        for bar in bars {
            let volume = i64::try_from(bar.volume).map_err(|_| {
                CacheError::InvalidBarData(format!(
                    "volume {} at {} does not fit the store",
                    bar.volume, bar.timestamp
                ))
            })?;
            written += stmt.execute(params![
                format_timestamp(bar.timestamp),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                volume,
            ])?;
        }
    }
    tx.commit()?;

    Ok(written)
}

fn read_table(path: &Path) -> Result<Vec<Bar>> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT Datetime, Open, High, Low, Close, Volume FROM {TABLE_NAME} ORDER BY Datetime ASC"
    ))?;

    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<f64>>(1)?,
            row.get::<_, Option<f64>>(2)?,
            row.get::<_, Option<f64>>(3)?,
            row.get::<_, Option<f64>>(4)?,
            row.get::<_, Option<i64>>(5)?,
        ))
    })?;

    let mut bars = Vec::new();
    for row in rows {
        let (ts, open, high, low, close, volume) = row?;
        // NULL prices are rows the provider had no trade for
        let (Some(open), Some(high), Some(low), Some(close)) = (open, high, low, close) else {
            continue;
        };
        let volume = volume.unwrap_or(0);
        let timestamp = parse_timestamp(&ts)
            .ok_or_else(|| CacheError::InvalidBarData(format!("bad Datetime '{}'", ts)))?;
        let volume = u64::try_from(volume)
            .map_err(|_| CacheError::InvalidBarData(format!("negative volume at {}", ts)))?;
        bars.push(Bar::new(timestamp, open, high, low, close, volume));
    }

    Ok(bars)
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    if ts.nanosecond() == 0 {
        ts.format(DATETIME_FORMAT).to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()
    }
}

/// Accepts both the space and the `T` separated ISO forms
fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, day).unwrap()
    }

    fn bar(date: NaiveDate, h: u32, m: u32, close: f64) -> Bar {
        Bar::new(
            date.and_hms_opt(h, m, 0).unwrap(),
            close - 0.1,
            close + 0.2,
            close - 0.3,
            close,
            1_000,
        )
    }

    #[test]
    fn test_missing_day_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();

        assert!(!store.exists(d(2)));
        assert!(store.read(d(2)).unwrap().is_empty());
        assert_eq!(store.last_cached_date().unwrap(), None);
    }

    #[test]
    fn test_write_then_read_is_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();

        let bars = vec![bar(d(2), 10, 2, 3.0), bar(d(2), 10, 0, 1.0), bar(d(2), 10, 1, 2.0)];
        assert_eq!(store.write(d(2), &bars).unwrap(), 3);

        assert!(store.exists(d(2)));
        assert!(store.path_for(d(2)).ends_with("2025-06-02.sqlite3"));

        let read = store.read(d(2)).unwrap();
        let closes: Vec<f64> = read.iter().map(|b| b.close).collect();
        assert_eq!(closes, vec![1.0, 2.0, 3.0]);
        assert_eq!(read[0].volume, 1_000);
    }

    #[test]
    fn test_rewrite_replaces_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();

        store
            .write(d(3), &[bar(d(3), 10, 0, 1.0), bar(d(3), 10, 1, 2.0)])
            .unwrap();
        store.write(d(3), &[bar(d(3), 11, 0, 9.0)]).unwrap();

        let read = store.read(d(3)).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].close, 9.0);
    }

    #[test]
    fn test_duplicate_timestamp_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();

        let written = store
            .write(d(4), &[bar(d(4), 10, 0, 1.0), bar(d(4), 10, 0, 5.0)])
            .unwrap();

        assert_eq!(written, 1);
        assert_eq!(store.read(d(4)).unwrap()[0].close, 1.0);
    }

    #[test]
    fn test_cursor_scan_ignores_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();

        store.write(d(5), &[bar(d(5), 10, 0, 1.0)]).unwrap();
        store.write(d(3), &[bar(d(3), 10, 0, 1.0)]).unwrap();
        std::fs::write(dir.path().join("notes.sqlite3"), b"x").unwrap();
        std::fs::write(dir.path().join("2025-06-09.sqlite3.tmp"), b"x").unwrap();
        std::fs::write(dir.path().join("2025-06-10.csv"), b"x").unwrap();

        assert_eq!(store.cached_dates().unwrap(), vec![d(3), d(5)]);
        assert_eq!(store.last_cached_date().unwrap(), Some(d(5)));
    }

    #[test]
    fn test_corrupt_file_is_a_read_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();
        std::fs::write(store.path_for(d(6)), b"definitely not sqlite").unwrap();

        let err = store.read(d(6)).unwrap_err();
        assert!(matches!(err, CacheError::StoreReadFailed { date, .. } if date == d(6)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_reads_t_separated_timestamps() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();

        let conn = Connection::open(store.path_for(d(9))).unwrap();
        ensure_table(&conn).unwrap();
        conn.execute(
            "INSERT INTO tf_1m VALUES ('2025-06-09T10:00:00', 1.0, 2.0, 0.5, 1.5, 7)",
            [],
        )
        .unwrap();
        drop(conn);

        let read = store.read(d(9)).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].timestamp, d(9).and_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn test_failed_new_day_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();
        let mut huge = bar(d(10), 10, 1, 2.0);
        huge.volume = u64::MAX;

        let err = store
            .write(d(10), &[bar(d(10), 10, 0, 1.0), huge])
            .unwrap_err();

        assert!(matches!(err, CacheError::StoreWriteFailed { date, .. } if date == d(10)));
        assert!(!store.exists(d(10)));
        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_rewrite_keeps_previous_day() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();
        store.write(d(11), &[bar(d(11), 10, 0, 4.0)]).unwrap();
        let mut huge = bar(d(11), 10, 1, 5.0);
        huge.volume = u64::MAX;

        assert!(store
            .write(d(11), &[bar(d(11), 10, 0, 9.0), huge])
            .is_err());

        let read = store.read(d(11)).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].close, 4.0);
    }

    #[test]
    fn test_failed_ledger_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();
        assert!(store.failed_dates().unwrap().is_empty());

        let failed: BTreeSet<_> = [d(12), d(9)].into_iter().collect();
        store.save_failed_dates(&failed).unwrap();

        assert_eq!(store.failed_dates().unwrap(), failed);
        // the ledger is never mistaken for a day file
        assert_eq!(store.last_cached_date().unwrap(), None);

        store.save_failed_dates(&BTreeSet::new()).unwrap();
        assert!(!dir.path().join(FAILED_LEDGER).exists());
    }

    #[test]
    fn test_garbled_ledger_reads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DayStore::open(dir.path()).unwrap();
        std::fs::write(dir.path().join(FAILED_LEDGER), b"[2025-06-").unwrap();

        assert!(store.failed_dates().unwrap().is_empty());
    }
}
