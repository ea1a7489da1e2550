//! Error types for the ingestion pipeline
//!
//! Insufficient data and degenerate regressions are not errors here: the
//! analytics engine reports them as values so callers cannot mistake them
//! for numbers.

use thiserror::Error;

use crate::types::Timeframe;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown timeframe: {0}")]
pub struct ParseTimeframeError(pub String);

/// Transport-level failures of the tick feed. Retried with backoff, never fatal.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("no symbols subscribed")]
    NoSubscriptions,

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("failed to send subscription frame: {0}")]
    Subscribe(String),

    #[error("no useful message for {0}s")]
    Silent(u64),
}

/// Why a vendor payload was rejected before touching pipeline state
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("unsupported event type: {0}")]
    Unsupported(String),

    #[error("empty symbol")]
    EmptySymbol,

    #[error("invalid {field}: {raw}")]
    InvalidNumber { field: &'static str, raw: String },

    #[error("price must be positive and finite, got {0}")]
    NonPositivePrice(f64),

    #[error("quantity must be non-negative and finite, got {0}")]
    NegativeQuantity(f64),

    #[error("event time must be positive, got {0}")]
    InvalidTimestamp(i64),
}

/// Bar store read/write failures. Logged and retried on the next cadence tick.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("corrupt bar file {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyticsError {
    #[error("rolling window {window} outside {min}..={max}")]
    WindowOutOfRange {
        window: usize,
        min: usize,
        max: usize,
    },

    #[error("series timeframes differ: {left} vs {right}")]
    TimeframeMismatch { left: Timeframe, right: Timeframe },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("symbol not tracked: {0}")]
    UnknownSymbol(String),

    #[error("timeframe {0} is not resampled")]
    UnknownTimeframe(Timeframe),

    #[error("writer task for {0} is gone")]
    WorkerGone(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),
}
