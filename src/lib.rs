//! PairFlow Library
//!
//! Real-time trade ingestion, multi-timeframe OHLCV bars and pairs analytics

pub mod analytics;
pub mod buffer;
pub mod config;
pub mod error;
pub mod feed;
pub mod pipeline;
pub mod resample;
pub mod store;
pub mod types;

#[cfg(feature = "dashboard")]
pub mod dashboard;
