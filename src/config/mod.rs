//! Configuration management for PairFlow
//!
//! Loads from optional config files + environment variables via .env

mod types;

pub use types::*;

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;

use crate::analytics::{MAX_WINDOW, MIN_WINDOW};
use crate::types::{normalize_symbol, Timeframe};

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub pipeline: PipelineConfig,
    pub store: StoreConfig,
    pub analytics: AnalyticsConfig,
    pub logging: LoggingConfig,
    pub dashboard: DashboardConfig,
}

fn with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        // Feed defaults
        .set_default("feed.url", "wss://fstream.binance.com/stream")?
        .set_default("feed.symbols", vec!["btcusdt", "ethusdt"])?
        .set_default("feed.backoff_base_ms", 1000)?
        .set_default("feed.backoff_max_ms", 60_000)?
        .set_default("feed.watchdog_silence_secs", 30)?
        // Pipeline defaults
        .set_default("pipeline.buffer_capacity", 10_000)?
        .set_default("pipeline.queue_capacity", 4096)?
        .set_default("pipeline.flush_interval_ms", 1000)?
        .set_default("pipeline.late_grace_buckets", 0)?
        .set_default("pipeline.allowed_lateness_ms", 0)?
        .set_default("pipeline.dedup_window", 1024)?
        .set_default("pipeline.timeframes", vec!["1s", "1m", "5m"])?
        // Store defaults
        .set_default("store.backend", "csv")?
        .set_default("store.data_dir", "./data")?
        .set_default("store.max_bars", 100)?
        // Analytics defaults
        .set_default("analytics.default_window", 20)?
        .set_default("analytics.zscore_threshold", 2.0)?
        // Logging defaults
        .set_default("logging.json", false)?
        .set_default("logging.level", "info")?
        // Dashboard defaults
        .set_default("dashboard.enabled", true)?
        .set_default("dashboard.host", "127.0.0.1")?
        .set_default("dashboard.port", 8001)
}

impl AppConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file first
        dotenvy::dotenv().ok();

        let config = with_defaults()?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // Override with environment variables (PAIRFLOW__FEED__SYMBOLS=btcusdt,solusdt)
            .add_source(
                Environment::with_prefix("PAIRFLOW")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("feed.symbols")
                    .with_list_parse_key("pipeline.timeframes"),
            )
            .build()
            .context("Failed to build configuration")?;

        let app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Built-in defaults only, ignoring files and environment
    pub fn defaults() -> Result<Self> {
        let config = with_defaults()?
            .build()
            .context("Failed to build default configuration")?;
        config
            .try_deserialize()
            .context("Failed to deserialize default configuration")
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.feed.symbols.iter().any(|s| normalize_symbol(s).is_empty()) {
            bail!("feed.symbols contains an empty symbol");
        }
        if self.feed.backoff_base_ms == 0 || self.feed.backoff_max_ms < self.feed.backoff_base_ms {
            bail!(
                "feed backoff must satisfy 0 < base ({}) <= max ({})",
                self.feed.backoff_base_ms,
                self.feed.backoff_max_ms
            );
        }
        if self.pipeline.buffer_capacity == 0 {
            bail!("pipeline.buffer_capacity must be positive");
        }
        if self.pipeline.queue_capacity == 0 {
            bail!("pipeline.queue_capacity must be positive");
        }
        if self.pipeline.flush_interval_ms == 0 {
            bail!("pipeline.flush_interval_ms must be positive");
        }
        if self.pipeline.allowed_lateness_ms < 0 {
            bail!("pipeline.allowed_lateness_ms must not be negative");
        }
        if self.timeframes()?.is_empty() {
            bail!("pipeline.timeframes must name at least one timeframe");
        }
        if self.store.max_bars == 0 {
            bail!("store.max_bars must be positive");
        }
        self.store_backend()?;
        let window = self.analytics.default_window;
        if !(MIN_WINDOW..=MAX_WINDOW).contains(&window) {
            bail!(
                "analytics.default_window {} outside {}..={}",
                window,
                MIN_WINDOW,
                MAX_WINDOW
            );
        }
        if !self.analytics.zscore_threshold.is_finite() || self.analytics.zscore_threshold <= 0.0 {
            bail!("analytics.zscore_threshold must be a positive number");
        }
        Ok(())
    }

    /// Parsed, de-duplicated timeframes in ascending width
    pub fn timeframes(&self) -> Result<Vec<Timeframe>> {
        let mut parsed = Vec::with_capacity(self.pipeline.timeframes.len());
        for raw in &self.pipeline.timeframes {
            let tf: Timeframe = raw
                .parse()
                .with_context(|| format!("Invalid entry in pipeline.timeframes: {:?}", raw))?;
            parsed.push(tf);
        }
        parsed.sort();
        parsed.dedup();
        Ok(parsed)
    }

    pub fn store_backend(&self) -> Result<StoreBackend> {
        self.store
            .backend
            .parse()
            .map_err(|e: String| anyhow::anyhow!(e))
    }

    /// Normalised startup symbols
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.feed.symbols.iter().map(|s| normalize_symbol(s)).collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    /// Generate a one-line digest of the config for logging
    pub fn digest(&self) -> String {
        format!(
            "symbols={:?} timeframes={:?} store={}:{} window={} z={:.2} dashboard={}:{}",
            self.feed.symbols,
            self.pipeline.timeframes,
            self.store.backend,
            self.store.data_dir,
            self.analytics.default_window,
            self.analytics.zscore_threshold,
            self.dashboard.host,
            self.dashboard.port
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
