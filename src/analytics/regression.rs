//! Ordinary least squares with intercept, closed form

use serde::Serialize;

/// Fit of `y = beta * x + alpha`
#[derive(Debug, Clone, Copy, Serialize)]
pub struct OlsFit {
    pub beta: f64,
    pub alpha: f64,
    pub r_squared: f64,
    /// Standard error of `beta`, with residual variance SSR / (n - 2)
    pub beta_std_error: f64,
    pub n: usize,
}

impl OlsFit {
    fn undefined(n: usize) -> Self {
        Self {
            beta: f64::NAN,
            alpha: f64::NAN,
            r_squared: f64::NAN,
            beta_std_error: f64::NAN,
            n,
        }
    }

    /// beta = Cov(x, y) / Var(x), alpha = mean(y) - beta * mean(x),
    /// R^2 = 1 - SSR / SST.
    ///
    /// All fields are NaN with fewer than 2 points or a constant regressor.
    pub fn fit(y: &[f64], x: &[f64]) -> Self {
        let n = y.len().min(x.len());
        if n < 2 {
            return Self::undefined(n);
        }
        let (y, x) = (&y[..n], &x[..n]);
        let nf = n as f64;
        let mx = x.iter().sum::<f64>() / nf;
        let my = y.iter().sum::<f64>() / nf;

        let mut sxx = 0.0;
        let mut sxy = 0.0;
        let mut syy = 0.0;
        for (xi, yi) in x.iter().zip(y) {
            let (dx, dy) = (xi - mx, yi - my);
            sxx += dx * dx;
            sxy += dx * dy;
            syy += dy * dy;
        }
        if sxx == 0.0 || !sxx.is_finite() {
            return Self::undefined(n);
        }

        let beta = sxy / sxx;
        let alpha = my - beta * mx;
        let ssr: f64 = x
            .iter()
            .zip(y)
            .map(|(xi, yi)| (yi - (alpha + beta * xi)).powi(2))
            .sum();
        let r_squared = if syy > 0.0 { 1.0 - ssr / syy } else { f64::NAN };
        let beta_std_error = if n > 2 {
            ((ssr / (nf - 2.0)) / sxx).sqrt()
        } else {
            f64::NAN
        };

        Self {
            beta,
            alpha,
            r_squared,
            beta_std_error,
            n,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.beta.is_finite()
    }
}
