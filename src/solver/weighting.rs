//! Turning an engine report into the residuals the update rule consumes.
//!
//! - `Unweighted`: the engine's own stage-I slopes and stage averages
//! - `InverseVariance`: per-line weights `1/(σ² + d²)`, `d` = deviation from the stage mean
//! - `Mad`: Huber weights around the stage median, scale from the MAD; stage centres are medians
//!
//! Weighted modes refit abundance vs. EP and vs. log RW over the stage-I rows.

use crate::domain::{EngineReport, LineAbundance, ResidualVector, WeightMode};
use crate::error::JobError;
use crate::math::{huber_reweight, mean, median, std_dev, weighted_line_fit, weighted_mean};

/// Huber cutoff in units of the MAD-derived scale.
pub const HUBER_K: f64 = 1.5;

/// Floor on the stage scatter so a perfectly flat stage does not produce infinite weights.
const MIN_SIGMA: f64 = 1e-3;

/// Check that the report carries one average per ionization stage.
pub fn check_stages(report: &EngineReport) -> Result<(), JobError> {
    match report.average_abundances.len() {
        2 => Ok(()),
        1 => Err(JobError::MissingIonizationData(
            "engine reported a single ionization stage; no usable Fe II lines".into(),
        )),
        n => Err(JobError::EngineInvocation(format!(
            "expected 2 average abundances in the report, found {n}"
        ))),
    }
}

/// Per-line weights for one stage under `mode` (all ones for `Unweighted`).
pub fn stage_weights(rows: &[LineAbundance], mode: WeightMode) -> Vec<f64> {
    let abund: Vec<f64> = rows.iter().map(|r| r.abundance).collect();
    match mode {
        WeightMode::Unweighted => vec![1.0; rows.len()],
        WeightMode::InverseVariance => {
            let m = mean(&abund).unwrap_or(0.0);
            let s = std_dev(&abund).unwrap_or(0.0).max(MIN_SIGMA);
            abund.iter().map(|a| 1.0 / (s * s + (a - m).powi(2))).collect()
        }
        WeightMode::Mad => {
            let centre = median(&abund).unwrap_or(0.0);
            let residuals: Vec<f64> = abund.iter().map(|a| a - centre).collect();
            huber_reweight(&vec![1.0; rows.len()], &residuals, HUBER_K)
        }
    }
}

fn stage_centre(rows: &[LineAbundance], weights: &[f64], mode: WeightMode) -> Option<f64> {
    let abund: Vec<f64> = rows.iter().map(|r| r.abundance).collect();
    match mode {
        WeightMode::Mad => median(&abund),
        _ => weighted_mean(&abund, weights),
    }
}

/// Aggregate `report` into a [`ResidualVector`].
pub fn aggregate(report: &EngineReport, mode: WeightMode) -> Result<ResidualVector, JobError> {
    check_stages(report)?;
    let engine_ep = report.ep_slopes.first().copied();
    let engine_rw = report.rw_slopes.first().copied();

    if mode == WeightMode::Unweighted {
        let (Some(ep_slope), Some(rw_slope)) = (engine_ep, engine_rw) else {
            return Err(JobError::EngineInvocation("report has no E.P/R.W slope lines".into()));
        };
        return Ok(ResidualVector {
            ep_slope,
            rw_slope,
            abundance_i: report.average_abundances[0],
            abundance_ii: report.average_abundances[1],
        });
    }

    let stage_i = report.stage(0);
    let stage_ii = report.stage(1);
    if stage_i.is_empty() {
        return Err(JobError::EngineInvocation("report has no per-line rows for Fe I".into()));
    }
    if stage_ii.is_empty() {
        return Err(JobError::MissingIonizationData("report has no per-line rows for Fe II".into()));
    }

    let w1 = stage_weights(stage_i, mode);
    let w2 = stage_weights(stage_ii, mode);
    let abund: Vec<f64> = stage_i.iter().map(|r| r.abundance).collect();
    let ep: Vec<f64> = stage_i.iter().map(|r| r.ep).collect();
    let rw: Vec<f64> = stage_i.iter().map(|r| r.log_rw).collect();

    // A degenerate abscissa (e.g. all lines at one EP) falls back to the engine's slope.
    let slope = |x: &[f64], fallback: Option<f64>, label: &str| {
        weighted_line_fit(x, &abund, &w1)
            .map(|f| f.slope)
            .or(fallback)
            .ok_or_else(|| {
                JobError::EngineInvocation(format!(
                    "no {label} slope: Fe I lines cannot be fitted and the report has none"
                ))
            })
    };

    Ok(ResidualVector {
        ep_slope: slope(&ep, engine_ep, "E.P")?,
        rw_slope: slope(&rw, engine_rw, "R.W")?,
        abundance_i: stage_centre(stage_i, &w1, mode).unwrap_or(report.average_abundances[0]),
        abundance_ii: stage_centre(stage_ii, &w2, mode).unwrap_or(report.average_abundances[1]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ep: f64, log_rw: f64, abundance: f64) -> LineAbundance {
        LineAbundance {
            wavelength: 5000.0 + 10.0 * ep,
            ep,
            log_rw,
            abundance,
        }
    }

    fn report(stage_i: Vec<LineAbundance>, stage_ii: Vec<LineAbundance>) -> EngineReport {
        EngineReport {
            ep_slopes: vec![0.004, 0.0],
            rw_slopes: vec![-0.002, 0.0],
            average_abundances: vec![7.5, 7.4],
            stages: vec![stage_i, stage_ii],
        }
    }

    #[test]
    fn unweighted_passes_engine_values_through() {
        let r = aggregate(&report(vec![], vec![]), WeightMode::Unweighted).unwrap();
        assert_eq!(r.ep_slope, 0.004);
        assert_eq!(r.rw_slope, -0.002);
        assert!((r.abundance_diff() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn stage_count_errors() {
        let mut rep = report(vec![], vec![]);
        rep.average_abundances = vec![7.5];
        let err = aggregate(&rep, WeightMode::Unweighted).unwrap_err();
        assert_eq!(err.kind(), "missing_ionization_data");

        rep.average_abundances = vec![];
        let err = aggregate(&rep, WeightMode::Unweighted).unwrap_err();
        assert_eq!(err.kind(), "engine_invocation");
    }

    #[test]
    fn weighted_modes_refit_slopes() {
        // abundance = 7.4 + 0.01 * EP exactly; RW flat.
        let s1: Vec<LineAbundance> = (0..6)
            .map(|i| {
                let ep = i as f64;
                row(ep, -5.0 + 0.1 * (i % 2) as f64, 7.4 + 0.01 * ep)
            })
            .collect();
        let s2 = vec![row(3.0, -4.8, 7.42), row(3.5, -4.9, 7.44)];
        for mode in [WeightMode::InverseVariance, WeightMode::Mad] {
            let r = aggregate(&report(s1.clone(), s2.clone()), mode).unwrap();
            assert!((r.ep_slope - 0.01).abs() < 1e-9, "{mode:?}");
            assert!(r.abundance_ii > 7.41 && r.abundance_ii < 7.45);
        }
    }

    #[test]
    fn mad_weighting_resists_a_wild_line() {
        let mut s1: Vec<LineAbundance> = (0..9).map(|i| row(i as f64 * 0.5, -5.0, 7.45)).collect();
        s1.push(row(2.0, -5.0, 9.0));
        let s2 = vec![row(3.0, -4.8, 7.45), row(3.5, -4.9, 7.45)];
        let r = aggregate(&report(s1, s2), WeightMode::Mad).unwrap();
        assert!((r.abundance_i - 7.45).abs() < 1e-12);
    }

    #[test]
    fn degenerate_fit_without_engine_slope_is_an_error() {
        let s1 = vec![row(2.0, -5.0, 7.40), row(2.0, -5.0, 7.50), row(2.0, -5.0, 7.45)];
        let s2 = vec![row(3.0, -4.8, 7.45), row(3.5, -4.9, 7.45)];
        let mut rep = report(s1, s2);
        rep.ep_slopes.clear();
        rep.rw_slopes.clear();
        for mode in [WeightMode::InverseVariance, WeightMode::Mad] {
            let err = aggregate(&rep, mode).unwrap_err();
            assert_eq!(err.kind(), "engine_invocation", "{mode:?}");
        }

        // With the engine's slopes present they stand in for the failed fit.
        rep.ep_slopes = vec![0.004];
        rep.rw_slopes = vec![-0.002];
        let r = aggregate(&rep, WeightMode::InverseVariance).unwrap();
        assert_eq!((r.ep_slope, r.rw_slope), (0.004, -0.002));
    }

    #[test]
    fn weighted_mode_without_stage_two_rows_is_missing_ionization() {
        let s1 = vec![row(1.0, -5.0, 7.4), row(2.0, -5.1, 7.5)];
        let err = aggregate(&report(s1, vec![]), WeightMode::InverseVariance).unwrap_err();
        assert_eq!(err.kind(), "missing_ionization_data");
    }
}
