//! Configuration sections

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    /// Combined-stream endpoint of the trade feed
    pub url: String,
    /// Instruments subscribed at startup (lowercase)
    pub symbols: Vec<String>,
    /// First reconnect delay in milliseconds
    pub backoff_base_ms: u64,
    /// Reconnect delay ceiling in milliseconds
    pub backoff_max_ms: u64,
    /// Reconnect when no trade arrives for this long
    pub watchdog_silence_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Ticks retained per symbol
    pub buffer_capacity: usize,
    /// Per-symbol queue between feed and writer; oldest ticks are dropped when full
    pub queue_capacity: usize,
    /// Wall-clock bar closing cadence in milliseconds
    pub flush_interval_ms: u64,
    /// Closed buckets that late ticks may still revise (0 = drop all late ticks)
    pub late_grace_buckets: u32,
    /// Extra wait past a bucket's end before the flush closes it
    pub allowed_lateness_ms: i64,
    /// Recent trade ids remembered for duplicate suppression
    pub dedup_window: usize,
    /// Resampled timeframes, e.g. ["1s", "1m", "5m"]
    pub timeframes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// "csv" or "memory"
    pub backend: String,
    /// Data directory
    pub data_dir: String,
    /// Closed bars retained per series
    pub max_bars: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyticsConfig {
    /// Rolling window when a request does not give one
    pub default_window: usize,
    /// |z| above which a spread is flagged
    pub zscore_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Filter used when RUST_LOG is unset
    pub level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

/// Bar store backend selected by `store.backend`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Csv,
    Memory,
}

impl std::str::FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(StoreBackend::Csv),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}
