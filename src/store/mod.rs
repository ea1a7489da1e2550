//! Bar Store - closed-bar history per (symbol, timeframe)
//!
//! The pipeline only depends on the upsert / ranged read / retain contract
//! of [`BarStore`]. Two backends ship with the crate: an in-memory map and a
//! CSV file per series.

mod csv_store;

pub use csv_store::CsvBarStore;

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::types::{BarKey, OhlcvBar, Timeframe};

/// Default number of closed bars retained per series
pub const DEFAULT_MAX_BARS: usize = 100;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BarStore: Send + Sync {
    /// Idempotent upsert keyed by (symbol, timeframe, bucket_start)
    async fn write_closed_bar(&self, bar: &OhlcvBar) -> Result<(), StoreError>;

    /// Up to `limit` most recent bars, oldest first
    async fn read_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, StoreError>;

    /// Trim the series to its newest `max_count` rows; returns rows removed
    async fn retain(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        max_count: usize,
    ) -> Result<usize, StoreError>;

    /// Bucket start of the newest stored bar
    async fn latest_bucket(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<i64>, StoreError> {
        let bars = self.read_range(symbol, timeframe, 1).await?;
        Ok(bars.last().map(|bar| bar.bucket_start))
    }
}

/// Ordered rows of one series, keyed by bucket start
pub(crate) type Series = BTreeMap<i64, OhlcvBar>;

pub(crate) fn tail(series: &Series, limit: usize) -> Vec<OhlcvBar> {
    let skip = series.len().saturating_sub(limit);
    series.values().skip(skip).cloned().collect()
}

/// Drop the oldest rows so at most `max_count` remain
pub(crate) fn trim(series: &mut Series, max_count: usize) -> usize {
    let excess = series.len().saturating_sub(max_count);
    for _ in 0..excess {
        series.pop_first();
    }
    excess
}

/// Volatile store, used by tests and the `memory` backend
#[derive(Debug, Default)]
pub struct MemoryBarStore {
    series: RwLock<HashMap<BarKey, Series>>,
}

impl MemoryBarStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, symbol: &str, timeframe: Timeframe) -> usize {
        self.series
            .read()
            .await
            .get(&BarKey::new(symbol, timeframe))
            .map_or(0, |series| series.len())
    }
}

#[async_trait]
impl BarStore for MemoryBarStore {
    async fn write_closed_bar(&self, bar: &OhlcvBar) -> Result<(), StoreError> {
        let mut series = self.series.write().await;
        series
            .entry(bar.key())
            .or_default()
            .insert(bar.bucket_start, bar.clone());
        Ok(())
    }

    async fn read_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<OhlcvBar>, StoreError> {
        let series = self.series.read().await;
        Ok(series
            .get(&BarKey::new(symbol, timeframe))
            .map(|s| tail(s, limit))
            .unwrap_or_default())
    }

    async fn retain(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        max_count: usize,
    ) -> Result<usize, StoreError> {
        let mut series = self.series.write().await;
        Ok(series
            .get_mut(&BarKey::new(symbol, timeframe))
            .map_or(0, |s| trim(s, max_count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn bar(symbol: &str, timeframe: Timeframe, bucket_start: i64, close: f64) -> OhlcvBar {
        OhlcvBar {
            symbol: symbol.to_string(),
            timeframe,
            bucket_start,
            open: close - 1.0,
            high: close + 1.0,
            low: close - 2.0,
            close,
            volume: 3.5,
            trades: 4,
            is_closed: true,
        }
    }

    #[tokio::test]
    async fn upsert_does_not_duplicate_rows() {
        let store = MemoryBarStore::new();
        let first = bar("btcusdt", Timeframe::Min1, 60_000, 100.0);
        store.write_closed_bar(&first).await.unwrap();
        store.write_closed_bar(&first).await.unwrap();

        let mut revised = first.clone();
        revised.close = 101.0;
        store.write_closed_bar(&revised).await.unwrap();

        let rows = store.read_range("btcusdt", Timeframe::Min1, 10).await.unwrap();
        assert_eq!(rows, vec![revised]);
    }

    #[tokio::test]
    async fn read_range_returns_most_recent_last() {
        let store = MemoryBarStore::new();
        for i in (0..5).rev() {
            store
                .write_closed_bar(&bar("ethusdt", Timeframe::Sec1, i * 1_000, i as f64))
                .await
                .unwrap();
        }

        let rows = store.read_range("ethusdt", Timeframe::Sec1, 3).await.unwrap();
        let starts: Vec<i64> = rows.iter().map(|b| b.bucket_start).collect();
        assert_eq!(starts, vec![2_000, 3_000, 4_000]);
        assert_eq!(
            store.latest_bucket("ethusdt", Timeframe::Sec1).await.unwrap(),
            Some(4_000)
        );
        assert!(store
            .read_range("ethusdt", Timeframe::Min1, 3)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn retain_trims_oldest() {
        let store = MemoryBarStore::new();
        for i in 0..8 {
            store
                .write_closed_bar(&bar("ethusdt", Timeframe::Sec1, i * 1_000, 1.0))
                .await
                .unwrap();
        }
        assert_eq!(store.retain("ethusdt", Timeframe::Sec1, 5).await.unwrap(), 3);
        assert_eq!(store.len("ethusdt", Timeframe::Sec1).await, 5);
        let rows = store.read_range("ethusdt", Timeframe::Sec1, 100).await.unwrap();
        assert_eq!(rows.first().map(|b| b.bucket_start), Some(3_000));
        assert_eq!(store.retain("missing", Timeframe::Sec1, 5).await.unwrap(), 0);
    }
}
