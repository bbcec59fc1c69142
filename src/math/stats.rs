//! Small descriptive statistics over per-line abundances.

/// Arithmetic mean; `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (divides by `n`).
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

pub fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    let sw: f64 = weights.iter().sum();
    if values.is_empty() || values.len() != weights.len() || sw <= 0.0 {
        return None;
    }
    Some(values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / sw)
}

pub fn median(values: &[f64]) -> Option<f64> {
    let mut v = values.to_vec();
    median_mut(&mut v)
}

pub fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}

/// Huber reweighting with a MAD-based scale.
///
/// `residuals` are deviations from a robust centre. Weights beyond `k·scale` are
/// shrunk by `cutoff/|r|`, never below `min_factor` of the base weight.
pub fn huber_reweight(w_base: &[f64], residuals: &[f64], k: f64) -> Vec<f64> {
    let mut abs: Vec<f64> = residuals.iter().map(|r| r.abs()).filter(|v| v.is_finite()).collect();
    let mad = median_mut(&mut abs).unwrap_or(0.0);
    let scale = (mad / 0.6745).max(1e-12);
    let cutoff = (k.max(1e-6)) * scale;

    let min_factor = 1e-3;
    w_base
        .iter()
        .zip(residuals.iter())
        .map(|(&w0, &r)| {
            let ar = r.abs();
            let factor = if ar <= cutoff || !ar.is_finite() { 1.0 } else { cutoff / ar };
            (w0 * factor).max(w0 * min_factor)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn population_std_divides_by_n() {
        let s = std_dev(&[1.0, 3.0]).unwrap();
        assert!((s - 1.0).abs() < 1e-12);
        assert!(std_dev(&[]).is_none());
    }

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn huber_downweights_only_the_far_point() {
        let r = [0.01, -0.02, 0.015, -0.01, 1.0];
        let w = huber_reweight(&[1.0; 5], &r, 1.5);
        assert!(w[..4].iter().all(|&v| (v - 1.0).abs() < 1e-12));
        assert!(w[4] < 0.1);
        assert!(w[4] >= 1e-3);
    }

    #[test]
    fn weighted_mean_respects_weights() {
        let m = weighted_mean(&[1.0, 3.0], &[3.0, 1.0]).unwrap();
        assert!((m - 1.5).abs() < 1e-12);
    }
}
