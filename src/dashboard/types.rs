//! Dashboard API Types
//!
//! JSON bodies returned by the HTTP routes.

use serde::{Deserialize, Serialize};

use crate::analytics::{is_plot_safe, PairAnalysis};
use crate::pipeline::MetricsSnapshot;
use crate::types::{OhlcvBar, Tick, Timeframe};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub symbols: usize,
    pub timeframes: Vec<Timeframe>,
    pub metrics: MetricsSnapshot,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolsResponse {
    pub symbols: Vec<String>,
    pub timeframes: Vec<Timeframe>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddSymbolResponse {
    pub symbol: String,
    /// False when the symbol was already tracked
    pub added: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OhlcvResponse {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: Vec<OhlcvBar>,
    /// In-progress bar, when one exists
    pub open_bar: Option<OhlcvBar>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestTickResponse {
    pub symbol: String,
    pub tick: Option<Tick>,
}

/// Latest values and chart hints alongside the full analysis
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResponse {
    pub analysis: PairAnalysis,
    pub current_spread: Option<f64>,
    pub current_zscore: Option<f64>,
    pub current_correlation: Option<f64>,
    pub zscore_alert: bool,
    pub spread_plot_safe: bool,
    pub zscore_plot_safe: bool,
}

impl AnalysisResponse {
    pub fn new(analysis: PairAnalysis, zscore_threshold: f64) -> Self {
        let (current_spread, current_zscore, current_correlation, zscore_alert, spread_ok, z_ok) =
            match analysis.result() {
                Some(r) => (
                    r.current_spread(),
                    r.current_zscore(),
                    r.current_correlation(),
                    r.zscore_breach(zscore_threshold),
                    is_plot_safe(&r.spread),
                    is_plot_safe(&defined(&r.zscore)),
                ),
                None => (None, None, None, false, false, false),
            };
        Self {
            analysis,
            current_spread,
            current_zscore,
            current_correlation,
            zscore_alert,
            spread_plot_safe: spread_ok,
            zscore_plot_safe: z_ok,
        }
    }
}

/// Rolling series start undefined; charts only see the defined part
fn defined(series: &[f64]) -> Vec<f64> {
    series.iter().copied().filter(|v| v.is_finite()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
