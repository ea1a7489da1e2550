//! CSV-backed bar store
//!
//! One file per series under `<data_dir>/bars/`, e.g. `btcusdt_1m.csv`.
//! Series are small (bounded by retention), so every upsert rewrites the whole
//! file through a temp file and a rename: a crash leaves either the old or the
//! new file, never a half-written row.

use async_trait::async_trait;
use csv::{ReaderBuilder, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{tail, trim, BarStore, Series};
use crate::error::StoreError;
use crate::types::{format_millis, normalize_symbol, BarKey, OhlcvBar, Timeframe};

/// Bar row for CSV storage
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BarRecord {
    bucket_start: i64,
    timestamp: String,
    symbol: String,
    timeframe: Timeframe,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
    #[serde(default)]
    trades: u64,
}

impl From<&OhlcvBar> for BarRecord {
    fn from(bar: &OhlcvBar) -> Self {
        Self {
            bucket_start: bar.bucket_start,
            timestamp: format_millis(bar.bucket_start),
            symbol: bar.symbol.clone(),
            timeframe: bar.timeframe,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            trades: bar.trades,
        }
    }
}

impl From<BarRecord> for OhlcvBar {
    fn from(record: BarRecord) -> Self {
        Self {
            symbol: normalize_symbol(&record.symbol),
            timeframe: record.timeframe,
            bucket_start: record.bucket_start,
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
            volume: record.volume,
            trades: record.trades,
            is_closed: true,
        }
    }
}

/// CSV persistence for closed bars
pub struct CsvBarStore {
    dir: PathBuf,
    /// Series loaded so far; a series is read from disk on first touch
    cache: Mutex<HashMap<BarKey, Series>>,
}

impl CsvBarStore {
    /// Create the store, making `<data_dir>/bars` if needed
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let dir = data_dir.as_ref().join("bars");
        fs::create_dir_all(&dir)?;
        info!(dir = %dir.display(), "CSV bar store ready");
        Ok(Self {
            dir,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing one series
    pub fn series_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        let safe: String = normalize_symbol(symbol)
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();
        self.dir.join(format!("{}_{}.csv", safe, timeframe.label()))
    }

    fn load_series(&self, key: &BarKey) -> Result<Series, StoreError> {
        let path = self.series_path(&key.symbol, key.timeframe);
        let mut series = Series::new();
        if !path.exists() {
            return Ok(series);
        }

        let file = fs::File::open(&path)?;
        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        for result in reader.deserialize() {
            let record: BarRecord = result.map_err(|e| StoreError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            let bar = OhlcvBar::from(record);
            series.insert(bar.bucket_start, bar);
        }

        debug!(series = %key, rows = series.len(), "Loaded bar series from disk");
        Ok(series)
    }

    fn persist_series(&self, key: &BarKey, series: &Series) -> Result<(), StoreError> {
        let path = self.series_path(&key.symbol, key.timeframe);
        let tmp = path.with_extension("csv.tmp");

        let file = fs::File::create(&tmp)?;
        let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
        for bar in series.values() {
            writer.serialize(BarRecord::from(bar))?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Run `f` on the cached series, loading it from disk on first use
    async fn with_series<T>(
        &self,
        key: BarKey,
        f: impl FnOnce(&BarKey, &mut Series) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut cache = self.cache.lock().await;
        if !cache.contains_key(&key) {
            let loaded = self.load_series(&key)?;
            cache.insert(key.clone(), loaded);
        }
        let series = cache.entry(key.clone()).or_default();
        f(&key, series)
    }
}

#[async_trait]
impl BarStore for CsvBarStore {
    async fn write_closed_bar(&self, bar: &OhlcvBar) -> Result<(), StoreError> {
        let mut stored = bar.clone();
        stored.is_closed = true;

        self.with_series(bar.key(), |key, series| {
            if series.get(&stored.bucket_start) == Some(&stored) {
                // identical redelivery
                return Ok(());
            }

            let bucket = stored.bucket_start;
            let previous = series.insert(bucket, stored);
            if let Err(e) = self.persist_series(key, series) {
                // keep the cache in step with the file
                match previous {
                    Some(old) => series.insert(bucket, old),
                    None => series.remove(&bucket),
                };
                return Err(e);
            }
            Ok(())
        })
        .await
    }

    async fn read_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, StoreError> {
        self.with_series(BarKey::new(symbol, timeframe), |_, series| {
            Ok(tail(series, limit))
        })
        .await
    }

    async fn retain(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        max_count: usize,
    ) -> Result<usize, StoreError> {
        self.with_series(BarKey::new(symbol, timeframe), |key, series| {
            let removed = trim(series, max_count);
            if removed > 0 {
                self.persist_series(key, series)?;
                debug!(series = %key, removed, "Trimmed bar series");
            }
            Ok(removed)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::bar;

    fn temp_data_dir(test_name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "pairflow_store_{}_{}",
            test_name,
            uuid::Uuid::new_v4()
        ))
    }

    #[tokio::test]
    async fn bars_survive_reopen() {
        let data_dir = temp_data_dir("reopen");
        let written = bar("btcusdt", Timeframe::Min1, 1_700_000_040_000, 37_000.5);
        {
            let store = CsvBarStore::new(&data_dir).unwrap();
            store.write_closed_bar(&written).await.unwrap();
        }

        let store = CsvBarStore::new(&data_dir).unwrap();
        let rows = store.read_range("btcusdt", Timeframe::Min1, 10).await.unwrap();
        assert_eq!(rows, vec![written]);

        let _ = fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn file_has_header_and_one_row_per_bucket() {
        let data_dir = temp_data_dir("header");
        let store = CsvBarStore::new(&data_dir).unwrap();
        let b = bar("ethusdt", Timeframe::Sec1, 5_000, 2_000.0);
        store.write_closed_bar(&b).await.unwrap();
        store.write_closed_bar(&b).await.unwrap();

        let content = fs::read_to_string(store.series_path("ethusdt", Timeframe::Sec1)).unwrap();
        let mut lines = content.lines();
        let header = lines.next().unwrap_or_default();
        assert!(
            header.starts_with("bucket_start,timestamp,symbol,timeframe,open,high,low,close,volume"),
            "unexpected header line: {}",
            header
        );
        assert_eq!(lines.count(), 1, "expected exactly one data row");

        let _ = fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn retain_rewrites_file() {
        let data_dir = temp_data_dir("retain");
        let store = CsvBarStore::new(&data_dir).unwrap();
        for i in 0..6 {
            store
                .write_closed_bar(&bar("solusdt", Timeframe::Sec1, i * 1_000, 20.0))
                .await
                .unwrap();
        }
        assert_eq!(store.retain("solusdt", Timeframe::Sec1, 4).await.unwrap(), 2);

        let reopened = CsvBarStore::new(&data_dir).unwrap();
        let rows = reopened.read_range("solusdt", Timeframe::Sec1, 100).await.unwrap();
        let starts: Vec<i64> = rows.iter().map(|b| b.bucket_start).collect();
        assert_eq!(starts, vec![2_000, 3_000, 4_000, 5_000]);

        let _ = fs::remove_dir_all(&data_dir);
    }

    #[tokio::test]
    async fn corrupt_file_is_reported() {
        let data_dir = temp_data_dir("corrupt");
        let store = CsvBarStore::new(&data_dir).unwrap();
        fs::write(
            store.series_path("btcusdt", Timeframe::Min1),
            "bucket_start,timestamp,symbol,timeframe,open,high,low,close,volume,trades\nx,y,z,1m,a,b,c,d,e,f\n",
        )
        .unwrap();

        let err = store
            .read_range("btcusdt", Timeframe::Min1, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));

        let _ = fs::remove_dir_all(&data_dir);
    }
}
