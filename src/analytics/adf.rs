//! Dickey-Fuller stationarity test on a spread series
//!
//! Regresses Δs_t on s_{t-1} plus a constant (no trend, no lagged
//! differences). Critical values use MacKinnon (2010) finite-sample response
//! surfaces; the p-value uses MacKinnon (1994) approximations.

use serde::Serialize;

use super::regression::OlsFit;

/// Spread points needed before a statistic is reported
pub const ADF_MIN_OBSERVATIONS: usize = 20;

/// Critical values for the constant-only specification
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CriticalValues {
    #[serde(rename = "1%")]
    pub one_pct: f64,
    #[serde(rename = "5%")]
    pub five_pct: f64,
    #[serde(rename = "10%")]
    pub ten_pct: f64,
}

impl CriticalValues {
    /// MacKinnon (2010) response surface, `c(T) = b0 + b1/T + b2/T^2 + b3/T^3`
    pub fn for_sample_size(nobs: usize) -> Self {
        let t = nobs.max(1) as f64;
        let surface = |b: [f64; 4]| b[0] + b[1] / t + b[2] / (t * t) + b[3] / (t * t * t);
        Self {
            one_pct: surface([-3.43035, -6.5393, -16.786, -79.433]),
            five_pct: surface([-2.86154, -2.8903, -4.234, -40.040]),
            ten_pct: surface([-2.56677, -1.5384, -2.809, 0.0]),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdfResult {
    pub statistic: f64,
    pub p_value: f64,
    pub used_lag: usize,
    /// Observations in the test regression
    pub n_observations: usize,
    pub critical_values: CriticalValues,
    pub is_stationary: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AdfOutcome {
    Computed(AdfResult),
    InsufficientData { observations: usize, required: usize },
}

impl AdfOutcome {
    pub fn result(&self) -> Option<&AdfResult> {
        match self {
            AdfOutcome::Computed(result) => Some(result),
            AdfOutcome::InsufficientData { .. } => None,
        }
    }

    /// False when the test could not run
    pub fn is_stationary(&self) -> bool {
        self.result().map_or(false, |r| r.is_stationary)
    }
}

/// Run the test. Fewer than [`ADF_MIN_OBSERVATIONS`] points is reported,
/// not computed.
pub fn adf_test(series: &[f64]) -> AdfOutcome {
    if series.len() < ADF_MIN_OBSERVATIONS {
        return AdfOutcome::InsufficientData {
            observations: series.len(),
            required: ADF_MIN_OBSERVATIONS,
        };
    }

    let lagged = &series[..series.len() - 1];
    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    let fit = OlsFit::fit(&diffs, lagged);

    let statistic = if fit.beta_std_error > 0.0 {
        fit.beta / fit.beta_std_error
    } else {
        f64::NAN
    };
    let critical_values = CriticalValues::for_sample_size(diffs.len());

    AdfOutcome::Computed(AdfResult {
        statistic,
        p_value: mackinnon_pvalue(statistic),
        used_lag: 0,
        n_observations: diffs.len(),
        critical_values,
        is_stationary: statistic < critical_values.five_pct,
    })
}

/// Approximate p-value of a constant-only Dickey-Fuller statistic
pub fn mackinnon_pvalue(statistic: f64) -> f64 {
    const TAU_MAX: f64 = 2.74;
    const TAU_MIN: f64 = -18.83;
    const TAU_STAR: f64 = -1.61;
    const SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
    const LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

    if statistic.is_nan() {
        return f64::NAN;
    }
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }
    let coefficients: &[f64] = if statistic <= TAU_STAR {
        &SMALL_P
    } else {
        &LARGE_P
    };
    // ascending powers
    let z = coefficients
        .iter()
        .rev()
        .fold(0.0, |acc, c| acc * statistic + c);
    normal_cdf(z)
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Complementary error function, Chebyshev fit (relative error < 1.2e-7)
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.26551223
        + t * (1.00002368
            + t * (0.37409196
                + t * (0.09678418
                    + t * (-0.18628806
                        + t * (0.27886807
                            + t * (-1.13520398
                                + t * (1.48851587 + t * (-0.82215223 + t * 0.17087277))))))));
    let r = t * poly.exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_cdf_reference_points() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 1e-7);
        assert!((normal_cdf(1.959964) - 0.975).abs() < 1e-6);
        assert!((normal_cdf(-1.644854) - 0.05).abs() < 1e-6);
    }

    #[test]
    fn critical_values_approach_asymptotic() {
        let large = CriticalValues::for_sample_size(100_000);
        assert!((large.one_pct + 3.43).abs() < 0.01);
        assert!((large.five_pct + 2.86).abs() < 0.01);
        assert!((large.ten_pct + 2.57).abs() < 0.01);

        let small = CriticalValues::for_sample_size(50);
        assert!(small.five_pct < large.five_pct);
        assert!(small.one_pct < small.five_pct && small.five_pct < small.ten_pct);
    }

    #[test]
    fn pvalue_is_monotone_and_bounded() {
        assert_eq!(mackinnon_pvalue(3.0), 1.0);
        assert_eq!(mackinnon_pvalue(-20.0), 0.0);
        assert!(mackinnon_pvalue(f64::NAN).is_nan());

        let at_five_pct = mackinnon_pvalue(-2.86);
        assert!((at_five_pct - 0.05).abs() < 0.01, "p = {}", at_five_pct);

        let mut previous = 0.0;
        for i in -60..=25 {
            let p = mackinnon_pvalue(i as f64 / 10.0);
            assert!(p >= previous - 1e-9);
            previous = p;
        }
    }

    #[test]
    fn short_series_is_insufficient() {
        let outcome = adf_test(&[1.0; 19]);
        assert!(matches!(
            outcome,
            AdfOutcome::InsufficientData {
                observations: 19,
                required: ADF_MIN_OBSERVATIONS
            }
        ));
        assert!(!outcome.is_stationary());
    }

    #[test]
    fn flat_series_has_undefined_statistic() {
        let outcome = adf_test(&[2.5; 40]);
        let result = outcome.result().unwrap();
        assert!(result.statistic.is_nan());
        assert!(result.p_value.is_nan());
        assert!(!result.is_stationary);
        assert_eq!(result.n_observations, 39);
        assert_eq!(result.used_lag, 0);
    }

    #[test]
    fn alternating_series_is_stationary() {
        let series: Vec<f64> = (0..60)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 } + (i % 7) as f64 * 0.01)
            .collect();
        let result = adf_test(&series).result().cloned().unwrap();
        assert!(result.statistic < result.critical_values.one_pct);
        assert!(result.is_stationary);
        assert!(result.p_value < 0.01);
    }
}
