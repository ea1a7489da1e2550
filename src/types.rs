//! Core types used throughout PairFlow
//!
//! Defines ticks, timeframes and OHLCV bars shared by the feed, the
//! resampler, the bar store and the analytics engine.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ParseTimeframeError;

/// Seconds in a 365-day year. Crypto venues trade around the clock, so every
/// second of the year is a potential sampling period.
pub const SECONDS_PER_YEAR: f64 = 365.0 * 24.0 * 60.0 * 60.0;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Render epoch milliseconds as RFC 3339 for logs and API payloads
pub fn format_millis(ts: i64) -> String {
    Utc.timestamp_millis_opt(ts)
        .single()
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// Canonical symbol form used as a map key everywhere (`BTCUSDT` -> `btcusdt`)
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Supported bar resolutions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1s")]
    Sec1,
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "1h")]
    Hour1,
}

impl Default for Timeframe {
    fn default() -> Self {
        Timeframe::Min1
    }
}

impl Timeframe {
    pub const ALL: [Timeframe; 5] = [
        Timeframe::Sec1,
        Timeframe::Min1,
        Timeframe::Min5,
        Timeframe::Min15,
        Timeframe::Hour1,
    ];

    /// Get duration in seconds
    pub fn duration_secs(&self) -> u64 {
        match self {
            Timeframe::Sec1 => 1,
            Timeframe::Min1 => 60,
            Timeframe::Min5 => 5 * 60,
            Timeframe::Min15 => 15 * 60,
            Timeframe::Hour1 => 60 * 60,
        }
    }

    pub fn duration_millis(&self) -> i64 {
        self.duration_secs() as i64 * 1000
    }

    /// Short label used in config, file names and routes
    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Sec1 => "1s",
            Timeframe::Min1 => "1m",
            Timeframe::Min5 => "5m",
            Timeframe::Min15 => "15m",
            Timeframe::Hour1 => "1h",
        }
    }

    /// Number of bars of this width in a year, used to annualise volatility
    pub fn periods_per_year(&self) -> f64 {
        SECONDS_PER_YEAR / self.duration_secs() as f64
    }

    /// Start of the bucket containing `ts` (epoch millis).
    ///
    /// `floor(ts / width) * width`, with a timestamp exactly on a boundary
    /// belonging to the bucket that starts there.
    pub fn bucket_start(&self, ts: i64) -> i64 {
        let width = self.duration_millis();
        ts.div_euclid(width) * width
    }
}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1s" | "1sec" => Ok(Timeframe::Sec1),
            "1m" | "1min" => Ok(Timeframe::Min1),
            "5m" | "5min" => Ok(Timeframe::Min5),
            "15m" | "15min" => Ok(Timeframe::Min15),
            "1h" | "1hour" | "60m" => Ok(Timeframe::Hour1),
            other => Err(ParseTimeframeError(other.to_string())),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Normalized trade tick from the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Lowercase instrument symbol (e.g. `btcusdt`)
    pub symbol: String,
    pub price: f64,
    pub quantity: f64,
    /// Timestamp in milliseconds (exchange time)
    pub event_time: i64,
    /// Timestamp when we received it (local time)
    pub ingest_time: i64,
    /// Vendor trade id, when the feed provides one
    pub trade_id: Option<u64>,
}

impl Tick {
    pub fn new(symbol: &str, price: f64, quantity: f64, event_time: i64) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            price,
            quantity,
            event_time,
            ingest_time: now_millis(),
            trade_id: None,
        }
    }

    pub fn with_trade_id(mut self, trade_id: u64) -> Self {
        self.trade_id = Some(trade_id);
        self
    }

    /// Latency from exchange to us in milliseconds
    pub fn latency_ms(&self) -> i64 {
        self.ingest_time.saturating_sub(self.event_time).max(0)
    }
}

/// Identifies one bar series
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl BarKey {
    pub fn new(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: normalize_symbol(symbol),
            timeframe,
        }
    }
}

impl fmt::Display for BarKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// OHLCV bar for one bucket of one (symbol, timeframe)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Bucket start in epoch millis
    pub bucket_start: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Sum of tick quantities in the bucket
    pub volume: f64,
    /// Number of ticks aggregated
    pub trades: u64,
    pub is_closed: bool,
}

impl OhlcvBar {
    /// Exclusive end of the bucket in epoch millis
    pub fn bucket_end(&self) -> i64 {
        self.bucket_start + self.timeframe.duration_millis()
    }

    pub fn key(&self) -> BarKey {
        BarKey {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe,
        }
    }

    /// high/low bound open and close
    pub fn is_consistent(&self) -> bool {
        self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close).min(self.high)
            && self.volume >= 0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_start_floors_to_width() {
        let tf = Timeframe::Min1;
        assert_eq!(tf.bucket_start(1_700_000_059_999), 1_699_999_980_000);
        assert_eq!(tf.bucket_start(1_700_000_040_000), 1_700_000_040_000);
        assert_eq!(Timeframe::Sec1.bucket_start(1_500), 1_000);
    }

    #[test]
    fn boundary_tick_belongs_to_new_bucket() {
        let tf = Timeframe::Min5;
        let boundary = 300_000 * 7;
        assert_eq!(tf.bucket_start(boundary), boundary);
        assert_eq!(tf.bucket_start(boundary - 1), boundary - 300_000);
    }

    #[test]
    fn timeframe_parse_and_display_agree() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.label().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("2m".parse::<Timeframe>().is_err());
        assert_eq!("1MIN".parse::<Timeframe>().unwrap(), Timeframe::Min1);
    }

    #[test]
    fn periods_per_year_scale_with_width() {
        let per_min = Timeframe::Min1.periods_per_year();
        assert!((per_min - 525_600.0).abs() < 1e-9);
        assert!((Timeframe::Sec1.periods_per_year() / per_min - 60.0).abs() < 1e-9);
    }

    #[test]
    fn timeframe_serializes_as_label() {
        let json = serde_json::to_string(&Timeframe::Min5).unwrap();
        assert_eq!(json, "\"5m\"");
    }

    #[test]
    fn symbols_are_lowercased() {
        let tick = Tick::new(" BTCUSDT ", 1.0, 1.0, 0);
        assert_eq!(tick.symbol, "btcusdt");
    }
}
