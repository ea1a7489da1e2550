//! Rolling pairs analytics
//!
//! Pure functions over two bar series: alignment by bucket, OLS hedge ratio,
//! spread, rolling z-score and correlation, descriptive stats and an ADF test
//! on the spread. Nothing here holds state; every call recomputes from the
//! bars it is given.

mod adf;
mod regression;
mod stats;

pub use adf::{adf_test, mackinnon_pvalue, AdfOutcome, AdfResult, CriticalValues, ADF_MIN_OBSERVATIONS};
pub use regression::OlsFit;
pub use stats::{
    annualized_volatility, is_plot_safe, last_defined, mean, pearson, rolling_correlation,
    rolling_zscore, sample_std, simple_returns, BasicStats,
};

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::AnalyticsError;
use crate::types::{OhlcvBar, Timeframe};

pub const MIN_WINDOW: usize = 5;
pub const MAX_WINDOW: usize = 100;
pub const DEFAULT_WINDOW: usize = 20;

/// Aligned points needed before a pair is analyzed
pub const MIN_ALIGNED_POINTS: usize = 5;

pub fn validate_window(window: usize) -> Result<usize, AnalyticsError> {
    if (MIN_WINDOW..=MAX_WINDOW).contains(&window) {
        Ok(window)
    } else {
        Err(AnalyticsError::WindowOutOfRange {
            window,
            min: MIN_WINDOW,
            max: MAX_WINDOW,
        })
    }
}

/// Close prices of two series matched on bucket start
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AlignedSeries {
    pub timestamps: Vec<i64>,
    pub first: Vec<f64>,
    pub second: Vec<f64>,
}

impl AlignedSeries {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Inner join on `bucket_start`; buckets present in only one series are dropped
pub fn align(first: &[OhlcvBar], second: &[OhlcvBar]) -> AlignedSeries {
    let lookup: BTreeMap<i64, f64> = second.iter().map(|b| (b.bucket_start, b.close)).collect();
    let joined: BTreeMap<i64, (f64, f64)> = first
        .iter()
        .filter_map(|b| lookup.get(&b.bucket_start).map(|&c2| (b.bucket_start, (b.close, c2))))
        .collect();

    let mut aligned = AlignedSeries::default();
    for (ts, (c1, c2)) in joined {
        aligned.timestamps.push(ts);
        aligned.first.push(c1);
        aligned.second.push(c2);
    }
    aligned
}

#[derive(Debug, Clone, Serialize)]
pub struct PairStats {
    pub first: BasicStats,
    pub second: BasicStats,
    pub spread: BasicStats,
}

/// Full analysis of one pair over its aligned window
#[derive(Debug, Clone, Serialize)]
pub struct PairAnalysisResult {
    pub symbol1: String,
    pub symbol2: String,
    pub timeframe: Timeframe,
    pub window: usize,
    /// Bucket starts of the aligned points
    pub timestamps: Vec<i64>,
    pub hedge_ratio: f64,
    pub intercept: f64,
    pub r_squared: f64,
    pub spread: Vec<f64>,
    pub zscore: Vec<f64>,
    pub correlation: Vec<f64>,
    pub stats: PairStats,
    pub adf: AdfOutcome,
}

impl PairAnalysisResult {
    pub fn current_spread(&self) -> Option<f64> {
        last_defined(&self.spread)
    }

    pub fn current_zscore(&self) -> Option<f64> {
        last_defined(&self.zscore)
    }

    pub fn current_correlation(&self) -> Option<f64> {
        last_defined(&self.correlation)
    }

    /// Latest z-score is defined and beyond `threshold` in absolute value
    pub fn zscore_breach(&self, threshold: f64) -> bool {
        self.current_zscore().map_or(false, |z| z.abs() > threshold)
    }

    pub fn is_stationary(&self) -> bool {
        self.adf.is_stationary()
    }

    pub fn adf_statistic(&self) -> Option<f64> {
        self.adf.result().map(|r| r.statistic)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PairAnalysis {
    Complete(Box<PairAnalysisResult>),
    InsufficientData {
        symbol1: String,
        symbol2: String,
        aligned_points: usize,
        required: usize,
    },
}

impl PairAnalysis {
    pub fn result(&self) -> Option<&PairAnalysisResult> {
        match self {
            PairAnalysis::Complete(result) => Some(result.as_ref()),
            PairAnalysis::InsufficientData { .. } => None,
        }
    }
}

/// Analyze two closed-bar series of the same timeframe.
///
/// `bars1` is the dependent leg: the hedge ratio fits `close1 = beta * close2 + alpha`.
pub fn analyze_pair(
    symbol1: &str,
    symbol2: &str,
    timeframe: Timeframe,
    bars1: &[OhlcvBar],
    bars2: &[OhlcvBar],
    window: usize,
) -> Result<PairAnalysis, AnalyticsError> {
    let window = validate_window(window)?;
    for bar in bars1.iter().chain(bars2) {
        if bar.timeframe != timeframe {
            return Err(AnalyticsError::TimeframeMismatch {
                left: timeframe,
                right: bar.timeframe,
            });
        }
    }

    let aligned = align(bars1, bars2);
    if aligned.len() < MIN_ALIGNED_POINTS {
        tracing::debug!(
            symbol1 = %symbol1,
            symbol2 = %symbol2,
            aligned = aligned.len(),
            "Insufficient aligned data for pair analysis"
        );
        return Ok(PairAnalysis::InsufficientData {
            symbol1: symbol1.to_string(),
            symbol2: symbol2.to_string(),
            aligned_points: aligned.len(),
            required: MIN_ALIGNED_POINTS,
        });
    }

    let periods = timeframe.periods_per_year();
    let fit = OlsFit::fit(&aligned.first, &aligned.second);
    let spread: Vec<f64> = aligned
        .first
        .iter()
        .zip(&aligned.second)
        .map(|(p1, p2)| p1 - fit.beta * p2)
        .collect();
    let zscore = rolling_zscore(&spread, window);
    let correlation = rolling_correlation(&aligned.first, &aligned.second, window);

    let stats = PairStats {
        first: BasicStats::compute(&aligned.first, periods),
        second: BasicStats::compute(&aligned.second, periods),
        spread: BasicStats::compute(&spread, periods),
    };
    let adf = adf_test(&spread);

    Ok(PairAnalysis::Complete(Box::new(PairAnalysisResult {
        symbol1: symbol1.to_string(),
        symbol2: symbol2.to_string(),
        timeframe,
        window,
        timestamps: aligned.timestamps,
        hedge_ratio: fit.beta,
        intercept: fit.alpha,
        r_squared: fit.r_squared,
        spread,
        zscore,
        correlation,
        stats,
        adf,
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bars(symbol: &str, closes: &[(i64, f64)]) -> Vec<OhlcvBar> {
        closes
            .iter()
            .map(|&(bucket_start, close)| OhlcvBar {
                symbol: symbol.to_string(),
                timeframe: Timeframe::Min1,
                bucket_start,
                open: close,
                high: close,
                low: close,
                close,
                volume: 1.0,
                trades: 1,
                is_closed: true,
            })
            .collect()
    }

    fn linear_pair(n: usize) -> (Vec<OhlcvBar>, Vec<OhlcvBar>) {
        let p2: Vec<(i64, f64)> = (0..n)
            .map(|i| (i as i64 * 60_000, 50.0 + (i as f64 * 0.7).sin() * 3.0 + i as f64 * 0.1))
            .collect();
        let p1: Vec<(i64, f64)> = p2.iter().map(|&(t, p)| (t, 2.0 * p + 5.0)).collect();
        (bars("aaa", &p1), bars("bbb", &p2))
    }

    #[test]
    fn align_keeps_common_buckets_in_order() {
        let a = bars("a", &[(3, 13.0), (1, 11.0), (2, 12.0)]);
        let b = bars("b", &[(2, 22.0), (3, 23.0), (4, 24.0)]);
        let aligned = align(&a, &b);
        assert_eq!(aligned.timestamps, vec![2, 3]);
        assert_eq!(aligned.first, vec![12.0, 13.0]);
        assert_eq!(aligned.second, vec![22.0, 23.0]);
    }

    #[test]
    fn exact_linear_pair_recovers_hedge_ratio() {
        let (a, b) = linear_pair(60);
        let analysis = analyze_pair("aaa", "bbb", Timeframe::Min1, &a, &b, 20).unwrap();
        let result = analysis.result().unwrap();

        assert!((result.hedge_ratio - 2.0).abs() < 1e-9);
        assert!((result.intercept - 5.0).abs() < 1e-7);
        assert!((result.r_squared - 1.0).abs() < 1e-9);
        assert_eq!(result.spread.len(), 60);
        assert!(result.spread.iter().all(|s| (s - 5.0).abs() < 1e-7));
        assert_eq!(result.zscore.len(), 60);
        assert!(result.correlation[19..].iter().all(|c| (c - 1.0).abs() < 1e-9));
    }

    #[test]
    fn few_aligned_points_is_explicit() {
        let a = bars("a", &[(0, 1.0), (1, 2.0), (2, 3.0), (3, 4.0), (9, 5.0)]);
        let b = bars("b", &[(0, 1.0), (1, 2.0), (2, 3.0), (3, 4.0), (8, 5.0)]);
        let analysis = analyze_pair("a", "b", Timeframe::Min1, &a, &b, 20).unwrap();
        assert!(matches!(
            analysis,
            PairAnalysis::InsufficientData {
                aligned_points: 4,
                required: MIN_ALIGNED_POINTS,
                ..
            }
        ));
    }

    #[test]
    fn constant_second_leg_propagates_nan() {
        let a = bars("a", &(0..30i64).map(|i| (i, 100.0 + i as f64)).collect::<Vec<_>>());
        let b = bars("b", &(0..30i64).map(|i| (i, 7.0)).collect::<Vec<_>>());
        let analysis = analyze_pair("a", "b", Timeframe::Min1, &a, &b, 10).unwrap();
        let result = analysis.result().unwrap();

        assert!(result.hedge_ratio.is_nan());
        assert!(result.r_squared.is_nan());
        assert!(result.spread.iter().all(|s| s.is_nan()));
        assert_eq!(result.current_spread(), None);
        assert_eq!(result.current_zscore(), None);
        assert!(!result.zscore_breach(2.0));
        assert!(!result.is_stationary());
    }

    #[test]
    fn window_bounds_are_enforced() {
        let (a, b) = linear_pair(30);
        for window in [4, 101] {
            assert!(matches!(
                analyze_pair("aaa", "bbb", Timeframe::Min1, &a, &b, window),
                Err(AnalyticsError::WindowOutOfRange { .. })
            ));
        }
        assert!(analyze_pair("aaa", "bbb", Timeframe::Min1, &a, &b, 5).is_ok());
        assert!(analyze_pair("aaa", "bbb", Timeframe::Min1, &a, &b, 100).is_ok());
    }

    #[test]
    fn mixed_timeframes_are_rejected() {
        let (a, mut b) = linear_pair(30);
        b[3].timeframe = Timeframe::Min5;
        assert!(matches!(
            analyze_pair("aaa", "bbb", Timeframe::Min1, &a, &b, 20),
            Err(AnalyticsError::TimeframeMismatch { .. })
        ));
    }

    #[test]
    fn zscore_breach_uses_latest_value() {
        // flat spread then a jump on the last point
        let p2: Vec<(i64, f64)> = (0..30i64).map(|i| (i, 10.0 + i as f64)).collect();
        let p1: Vec<(i64, f64)> = p2
            .iter()
            .enumerate()
            .map(|(i, &(t, p))| {
                let noise = if i % 2 == 0 { 0.05 } else { -0.05 };
                let shock = if i == 29 { 3.0 } else { 0.0 };
                (t, p + noise + shock)
            })
            .collect();
        let analysis = analyze_pair(
            "a",
            "b",
            Timeframe::Min1,
            &bars("a", &p1),
            &bars("b", &p2),
            20,
        )
        .unwrap();
        let result = analysis.result().unwrap();
        let z = result.current_zscore().unwrap();
        assert!(z > 2.0, "z = {}", z);
        assert!(result.zscore_breach(2.0));
        assert!(!result.zscore_breach(z + 0.1));
    }

    #[test]
    fn insufficient_data_serializes_with_status() {
        let analysis = analyze_pair("a", "b", Timeframe::Min1, &[], &[], 20).unwrap();
        let json = serde_json::to_value(&analysis).unwrap();
        assert_eq!(json["status"], "insufficient_data");
        assert_eq!(json["aligned_points"], 0);
    }
}
