//! Weighted least squares.
//!
//! Two consumers:
//!
//! - the grid interpolator fits tiny polynomials (2–4 samples, degree ≤ 2) per
//!   atmosphere cell and evaluates them at the target
//! - the weighting/error code fits straight lines of abundance against EP and
//!   reduced width and needs the slope standard error
//!
//! ```text
//! minimize Σ w_i (y_i - x_i^T β)^2
//! ```
//!
//! Rows are scaled by `sqrt(w_i)` and solved as ordinary least squares via SVD
//! (nalgebra's `QR::solve` is intended for square systems and will panic for
//! non-square matrices).

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Fit `y = Σ_k β_k x^k` (k ≤ degree) and return `β_0`, i.e. the value at `x = 0`.
///
/// Used with `x` = signed distance from the target, so `β_0` is the interpolated value.
pub fn polynomial_value_at_zero(xs: &[f64], ys: &[f64], degree: usize) -> Option<f64> {
    let n = xs.len();
    if n == 0 || n != ys.len() || degree + 1 > n {
        return None;
    }
    // Scale the abscissa so Teff distances (~100s of K) and logg distances (~0.5)
    // condition the Vandermonde matrix equally.
    let scale = xs.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1e-12);
    let x = DMatrix::from_fn(n, degree + 1, |i, k| (xs[i] / scale).powi(k as i32));
    let y = DVector::from_column_slice(ys);
    solve_least_squares(&x, &y).map(|beta| beta[0])
}

/// Result of a weighted straight-line fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub intercept: f64,
    pub slope: f64,
    /// Standard error of the slope (0 when there are only two points).
    pub slope_stderr: f64,
}

/// Weighted fit of `y = a + b x`.
///
/// Returns `None` for fewer than two usable points or a degenerate abscissa.
pub fn weighted_line_fit(x: &[f64], y: &[f64], w: &[f64]) -> Option<LineFit> {
    let rows: Vec<(f64, f64, f64)> = x
        .iter()
        .zip(y)
        .zip(w)
        .map(|((&xi, &yi), &wi)| (xi, yi, wi))
        .filter(|(xi, yi, wi)| xi.is_finite() && yi.is_finite() && wi.is_finite() && *wi > 0.0)
        .collect();
    let n = rows.len();
    if n < 2 {
        return None;
    }

    let sw: f64 = rows.iter().map(|r| r.2).sum();
    let xm = rows.iter().map(|r| r.2 * r.0).sum::<f64>() / sw;
    let ym = rows.iter().map(|r| r.2 * r.1).sum::<f64>() / sw;
    let sxx: f64 = rows.iter().map(|r| r.2 * (r.0 - xm).powi(2)).sum();
    if sxx <= 1e-300 {
        return None;
    }
    let sxy: f64 = rows.iter().map(|r| r.2 * (r.0 - xm) * (r.1 - ym)).sum();
    let slope = sxy / sxx;
    let intercept = ym - slope * xm;

    let slope_stderr = if n > 2 {
        // Normalize weights to mean 1 so the residual variance keeps its units.
        let norm = n as f64 / sw;
        let ssr: f64 = rows
            .iter()
            .map(|r| r.2 * norm * (r.1 - intercept - slope * r.0).powi(2))
            .sum();
        ((ssr / (n as f64 - 2.0)) / (sxx * norm)).sqrt()
    } else {
        0.0
    };

    Some(LineFit {
        intercept,
        slope,
        slope_stderr,
    })
}
