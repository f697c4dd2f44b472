//! Small numeric kernels shared by the analyzers and models.
//!
//! Everything here works on plain slices and returns `None` instead of
//! producing NaNs when the input is degenerate.

/// Arithmetic mean; `None` for an empty slice
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population variance
pub fn variance(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    Some(values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64)
}

/// Sample autocorrelation at `lag`, normalised by the full-series variance
pub fn autocorrelation(values: &[f64], lag: usize) -> f64 {
    if lag == 0 || values.len() < lag + 1 {
        return 0.0;
    }

    let m = values.iter().sum::<f64>() / values.len() as f64;
    let denominator: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    if denominator == 0.0 {
        return 0.0;
    }

    let numerator: f64 = (0..values.len() - lag)
        .map(|i| (values[i] - m) * (values[i + lag] - m))
        .sum();

    numerator / denominator
}

/// Autocovariances for lags `0..=max_lag`
pub fn autocovariances(values: &[f64], max_lag: usize) -> Vec<f64> {
    let n = values.len();
    let m = mean(values).unwrap_or(0.0);
    (0..=max_lag)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            (0..n - lag)
                .map(|i| (values[i] - m) * (values[i + lag] - m))
                .sum::<f64>()
                / n as f64
        })
        .collect()
}

/// Ordinary least-squares line through `(x, y)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

impl LinearFit {
    pub fn at(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }
}

/// Fit `y = intercept + slope * x`; a single point yields a flat line
pub fn linear_fit(xs: &[f64], ys: &[f64]) -> Option<LinearFit> {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return None;
    }

    let x_mean = xs[..n].iter().sum::<f64>() / n as f64;
    let y_mean = ys[..n].iter().sum::<f64>() / n as f64;

    let numerator: f64 = xs[..n].iter().zip(&ys[..n])
        .map(|(x, y)| (x - x_mean) * (y - y_mean))
        .sum();
    let denominator: f64 = xs[..n].iter()
        .map(|x| (x - x_mean).powi(2))
        .sum();

    let slope = if denominator != 0.0 { numerator / denominator } else { 0.0 };
    let intercept = y_mean - slope * x_mean;

    let ss_res: f64 = xs[..n].iter().zip(&ys[..n])
        .map(|(x, y)| (y - (intercept + slope * x)).powi(2))
        .sum();
    let ss_tot: f64 = ys[..n].iter()
        .map(|y| (y - y_mean).powi(2))
        .sum();
    let r_squared = if ss_tot != 0.0 { 1.0 - (ss_res / ss_tot) } else { 0.0 };

    Some(LinearFit { slope, intercept, r_squared })
}

/// Solve `a * x = b` by Gaussian elimination with partial pivoting.
///
/// `a` is row-major `n x n`. Returns `None` when the system is singular.
pub fn solve_linear_system(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    if a.len() != n || a.iter().any(|row| row.len() != n) {
        return None;
    }

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col].abs().partial_cmp(&a[j][col].abs()).unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

/// Yule-Walker AR coefficients via the Levinson-Durbin recursion.
///
/// `autocov[k]` is the autocovariance at lag `k`; the result holds the
/// coefficients for lags `1..=order`.
pub fn levinson_durbin(autocov: &[f64], order: usize) -> Option<Vec<f64>> {
    if order == 0 {
        return Some(Vec::new());
    }
    if autocov.len() <= order || autocov[0] <= 0.0 {
        return None;
    }

    let mut phi: Vec<f64> = Vec::with_capacity(order);
    let mut error = autocov[0];

    for k in 1..=order {
        let acc: f64 = autocov[k] - (1..k).map(|j| phi[j - 1] * autocov[k - j]).sum::<f64>();
        let kappa = acc / error;

        let previous = phi.clone();
        for j in 0..k - 1 {
            phi[j] = previous[j] - kappa * previous[k - 2 - j];
        }
        phi.push(kappa);

        error *= 1.0 - kappa * kappa;
        if error <= 0.0 || !error.is_finite() {
            return None;
        }
    }

    Some(phi)
}

/// One fitted sinusoid `amplitude * cos(2π t / period - phase)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HarmonicFit {
    pub level: f64,
    pub amplitude: f64,
    pub phase: f64,
}

/// Harmonic regression of `values` observed at hour indices `hours`
pub fn harmonic_fit(hours: &[f64], values: &[f64], period: f64) -> Option<HarmonicFit> {
    let n = hours.len().min(values.len());
    if n < 3 || period <= 0.0 {
        return None;
    }

    let omega = 2.0 * std::f64::consts::PI / period;
    let mut xtx = vec![vec![0.0; 3]; 3];
    let mut xty = vec![0.0; 3];

    for i in 0..n {
        let row = [1.0, (omega * hours[i]).cos(), (omega * hours[i]).sin()];
        for r in 0..3 {
            xty[r] += row[r] * values[i];
            for c in 0..3 {
                xtx[r][c] += row[r] * row[c];
            }
        }
    }

    let beta = solve_linear_system(xtx, xty)?;
    Some(HarmonicFit {
        level: beta[0],
        amplitude: (beta[1] * beta[1] + beta[2] * beta[2]).sqrt(),
        phase: beta[2].atan2(beta[1]),
    })
}
