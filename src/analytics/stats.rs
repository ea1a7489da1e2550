//! Descriptive and rolling statistics over price series
//!
//! Every function returns NaN for undefined results (too few points, zero
//! dispersion) rather than a placeholder number.

use serde::Serialize;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator)
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return f64::NAN;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    (ss / (values.len() - 1) as f64).sqrt()
}

/// Simple returns p[t] / p[t-1] - 1
pub fn simple_returns(prices: &[f64]) -> Vec<f64> {
    prices.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Annualized volatility: sample std of simple returns * sqrt(periods per year).
/// Needs at least 3 prices (2 returns).
pub fn annualized_volatility(prices: &[f64], periods_per_year: f64) -> f64 {
    if prices.len() < 3 {
        return f64::NAN;
    }
    let vol = sample_std(&simple_returns(prices)) * periods_per_year.sqrt();
    if vol.is_finite() {
        vol
    } else {
        f64::NAN
    }
}

/// Pearson correlation of two equal-length slices
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let (mx, my) = (mean(x), mean(y));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        let (dx, dy) = (a - mx, b - my);
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}

/// Rolling z-score over a trailing window of `window` points.
///
/// Output has the input's length. Index `t` is defined from `t = window - 1`
/// on; earlier points, and windows with zero std, are NaN.
pub fn rolling_zscore(series: &[f64], window: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; series.len()];
    if window < 2 || series.len() < window {
        return out;
    }
    for t in (window - 1)..series.len() {
        let slice = &series[t + 1 - window..=t];
        let std = sample_std(slice);
        if std > 0.0 && std.is_finite() {
            out[t] = (series[t] - mean(slice)) / std;
        }
    }
    out
}

/// Rolling Pearson correlation, same windowing and NaN policy as [`rolling_zscore`]
pub fn rolling_correlation(x: &[f64], y: &[f64], window: usize) -> Vec<f64> {
    let n = x.len().min(y.len());
    let mut out = vec![f64::NAN; n];
    if window < 2 || n < window {
        return out;
    }
    for t in (window - 1)..n {
        let range = t + 1 - window..t + 1;
        out[t] = pearson(&x[range.clone()], &y[range]);
    }
    out
}

/// Last finite value, if any
pub fn last_defined(series: &[f64]) -> Option<f64> {
    series.iter().rev().copied().find(|v| v.is_finite())
}

/// Whether a series can be charted: at least 3 points, all finite, not flat
pub fn is_plot_safe(series: &[f64]) -> bool {
    if series.len() < 3 || series.iter().any(|v| !v.is_finite()) {
        return false;
    }
    let first = series[0];
    series.iter().any(|v| *v != first)
}

/// Summary of one price series
#[derive(Debug, Clone, Serialize)]
pub struct BasicStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
    /// Annualized volatility of simple returns
    pub volatility: f64,
}

impl BasicStats {
    pub fn compute(prices: &[f64], periods_per_year: f64) -> Self {
        let (min, max) = if prices.is_empty() {
            (f64::NAN, f64::NAN)
        } else {
            prices
                .iter()
                .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &p| {
                    (lo.min(p), hi.max(p))
                })
        };
        Self {
            count: prices.len(),
            mean: mean(prices),
            std: sample_std(prices),
            min,
            max,
            last: prices.last().copied().unwrap_or(f64::NAN),
            volatility: annualized_volatility(prices, periods_per_year),
        }
    }
}
