//! Parameter uncertainties from the final line set.
//!
//! - σTeff, σvt: standard error of the EP / RW slope fits divided by the slope's
//!   sensitivity to the parameter
//! - σlogg: standard error of the Fe I − Fe II difference divided by its sensitivity to logg
//! - σ[Fe/H]: Fe I scatter combined with the Teff-induced abundance shift
//!
//! Sensitivities come from one perturbed engine evaluation per parameter. When a
//! perturbation fails (e.g. it steps off the grid) or shows no response, the
//! inverse solver gain is used instead.

use tracing::{debug, warn};

use crate::domain::{ConvergenceState, ParameterVector, ResidualVector, Uncertainties, WeightMode};
use crate::engine::SynthesisEngine;
use crate::error::JobError;
use crate::io::linelist::LineList;
use crate::math::{std_dev, weighted_line_fit};
use crate::solver::convergence::StepGains;
use crate::solver::weighting::{aggregate, stage_weights};

/// Published linear logg corrections `logg' = logg + a·Teff + b`.
pub const ASTERO_TEFF_COEF: f64 = -3.89e-4;
pub const ASTERO_OFFSET: f64 = 2.10;
pub const LC_TEFF_COEF: f64 = -4.57e-4;
pub const LC_OFFSET: f64 = 2.59;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Perturbations {
    pub teff: f64,
    pub vt: f64,
    pub logg: f64,
}

impl Default for Perturbations {
    fn default() -> Self {
        Self {
            teff: 100.0,
            vt: 0.1,
            logg: 0.2,
        }
    }
}

/// Asteroseismic-calibrated gravity and its error.
pub fn logg_astero(logg: f64, teff: f64, sigma_teff: f64, sigma_feh: f64) -> (f64, f64) {
    secondary(logg, teff, sigma_teff, sigma_feh, ASTERO_TEFF_COEF, ASTERO_OFFSET)
}

/// Light-curve-calibrated gravity and its error.
pub fn logg_light_curve(logg: f64, teff: f64, sigma_teff: f64, sigma_feh: f64) -> (f64, f64) {
    secondary(logg, teff, sigma_teff, sigma_feh, LC_TEFF_COEF, LC_OFFSET)
}

fn secondary(logg: f64, teff: f64, sigma_teff: f64, sigma_feh: f64, a: f64, b: f64) -> (f64, f64) {
    let value = logg + a * teff + b;
    let error = ((a * sigma_teff).powi(2) + sigma_feh.powi(2)).sqrt();
    (value, error)
}

/// Finite-difference response of the residuals to one parameter.
fn response<E: SynthesisEngine + ?Sized>(
    engine: &mut E,
    lines: &LineList,
    at: ParameterVector,
    base: &ResidualVector,
    weights: WeightMode,
    delta: f64,
    label: &str,
) -> Option<ResidualVector> {
    let probed = engine
        .evaluate(&at, lines)
        .and_then(|report| aggregate(&report, weights));
    match probed {
        Ok(r) => Some(ResidualVector {
            ep_slope: (r.ep_slope - base.ep_slope) / delta,
            rw_slope: (r.rw_slope - base.rw_slope) / delta,
            abundance_i: (r.abundance_i - base.abundance_i) / delta,
            abundance_ii: (r.abundance_ii - base.abundance_ii) / delta,
        }),
        Err(e) => {
            warn!(parameter = label, error = %e, "sensitivity probe failed; using solver gain");
            None
        }
    }
}

fn usable(value: f64) -> Option<f64> {
    (value.is_finite() && value.abs() > 1e-12).then_some(value.abs())
}

/// Estimate uncertainties for the final state of a run.
pub fn estimate<E: SynthesisEngine + ?Sized>(
    engine: &mut E,
    lines: &LineList,
    state: &ConvergenceState,
    weights: WeightMode,
    gains: &StepGains,
    probes: &Perturbations,
) -> Result<Uncertainties, JobError> {
    let report = state
        .report
        .as_ref()
        .ok_or_else(|| JobError::EngineInvocation("no engine report to estimate errors from".into()))?;
    let base = aggregate(report, weights)?;
    let p = state.params;

    let stage_i = report.stage(0);
    let stage_ii = report.stage(1);
    let w1 = stage_weights(stage_i, weights);
    let abund_i: Vec<f64> = stage_i.iter().map(|r| r.abundance).collect();
    let abund_ii: Vec<f64> = stage_ii.iter().map(|r| r.abundance).collect();
    let ep: Vec<f64> = stage_i.iter().map(|r| r.ep).collect();
    let rw: Vec<f64> = stage_i.iter().map(|r| r.log_rw).collect();

    let se_ep = weighted_line_fit(&ep, &abund_i, &w1).map(|f| f.slope_stderr).unwrap_or(0.0);
    let se_rw = weighted_line_fit(&rw, &abund_i, &w1).map(|f| f.slope_stderr).unwrap_or(0.0);
    let sigma_i = std_dev(&abund_i).unwrap_or(0.0);
    let sigma_ii = std_dev(&abund_ii).unwrap_or(0.0);

    let d_teff = response(
        engine,
        lines,
        ParameterVector { teff: p.teff + probes.teff, ..p },
        &base,
        weights,
        probes.teff,
        "teff",
    );
    let d_vt = response(
        engine,
        lines,
        ParameterVector { vt: p.vt + probes.vt, ..p },
        &base,
        weights,
        probes.vt,
        "vt",
    );
    let d_logg = response(
        engine,
        lines,
        ParameterVector { logg: p.logg + probes.logg, ..p },
        &base,
        weights,
        probes.logg,
        "logg",
    );

    let ep_per_teff = d_teff
        .and_then(|d| usable(d.ep_slope))
        .unwrap_or(1.0 / gains.teff);
    let rw_per_vt = d_vt.and_then(|d| usable(d.rw_slope)).unwrap_or(1.0 / gains.vt);
    let diff_per_logg = d_logg
        .and_then(|d| usable(d.abundance_diff()))
        .unwrap_or(1.0 / gains.logg);
    let abund_per_teff = d_teff.map(|d| d.abundance_i).unwrap_or(0.0);

    let sigma_teff = se_ep / ep_per_teff;
    let sigma_vt = se_rw / rw_per_vt;
    let diff_se = {
        let n1 = abund_i.len().max(1) as f64;
        let n2 = abund_ii.len().max(1) as f64;
        (sigma_i.powi(2) / n1 + sigma_ii.powi(2) / n2).sqrt()
    };
    let sigma_logg = diff_se / diff_per_logg;
    let sigma_feh = (sigma_i.powi(2) + (abund_per_teff * sigma_teff).powi(2)).sqrt();

    debug!(
        se_ep,
        se_rw,
        ep_per_teff,
        rw_per_vt,
        diff_per_logg,
        "uncertainty sensitivities"
    );

    let (logg_astero, logg_astero_err) = logg_astero(p.logg, p.teff, sigma_teff, sigma_feh);
    let (logg_lc, logg_lc_err) = logg_light_curve(p.logg, p.teff, sigma_teff, sigma_feh);

    Ok(Uncertainties {
        teff: sigma_teff,
        logg: sigma_logg,
        feh: sigma_feh,
        vt: sigma_vt,
        logg_astero,
        logg_astero_err,
        logg_lc,
        logg_lc_err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConvergenceStatus;
    use crate::solver::convergence::{SolverConfig, solve};
    use crate::testkit::{LinearEngine, ScriptedEngine, report_from_abundances, sample_lines};

    #[test]
    fn secondary_gravity_formulas() {
        let (g, e) = logg_astero(4.44, 5777.0, 0.0, 0.05);
        assert!((g - (4.44 - 3.89e-4 * 5777.0 + 2.10)).abs() < 1e-12);
        assert!((e - 0.05).abs() < 1e-12);

        let (g, e) = logg_light_curve(4.44, 5777.0, 50.0, 0.04);
        assert!((g - (4.44 - 4.57e-4 * 5777.0 + 2.59)).abs() < 1e-12);
        let expected = ((4.57e-4 * 50.0_f64).powi(2) + 0.04_f64.powi(2)).sqrt();
        assert!((e - expected).abs() < 1e-12);
    }

    #[test]
    fn noise_free_lines_give_small_errors() {
        let lines = sample_lines();
        let truth = ParameterVector::new(5700.0, 4.4, 0.05, 1.2);
        let mut engine = LinearEngine::new(truth);
        let config = SolverConfig::default();
        let state = solve(&mut engine, &lines, ParameterVector::default(), &config).unwrap();
        assert_eq!(state.status, ConvergenceStatus::Converged);

        let u = estimate(&mut engine, &lines, &state, config.weights, &config.gains, &Perturbations::default()).unwrap();
        // Residual EP/RW terms at convergence are tiny but non-zero; errors stay small.
        assert!(u.teff < 5.0);
        assert!(u.vt < 0.05);
        assert!(u.feh < 0.01);
    }

    #[test]
    fn scatter_drives_errors_and_probes_use_the_engine() {
        let lines = sample_lines();
        let truth = ParameterVector::new(5700.0, 4.4, 0.05, 1.2);
        let mut engine = LinearEngine::new(truth).with_noise(0.05);
        let config = SolverConfig::default();
        let state = solve(&mut engine, &lines, ParameterVector::default(), &config).unwrap();
        let before = engine.calls();

        let u = estimate(&mut engine, &lines, &state, config.weights, &config.gains, &Perturbations::default()).unwrap();
        assert_eq!(engine.calls(), before + 3);
        assert!(u.teff > 1.0 && u.teff.is_finite());
        assert!(u.vt > 0.0 && u.vt.is_finite());
        assert!(u.feh > 0.02 && u.feh < 0.2);
        assert!(u.logg > 0.0 && u.logg < 0.5);
        assert!((u.logg_lc - (state.params.logg + LC_TEFF_COEF * state.params.teff + LC_OFFSET)).abs() < 1e-12);
    }

    #[test]
    fn failed_probes_fall_back_to_gains() {
        let s1: Vec<(f64, f64)> = (0..12).map(|i| (5000.0 + i as f64, 7.40 + 0.01 * (i % 3) as f64)).collect();
        let s2 = [(4508.29, 7.40), (5234.63, 7.42)];
        let mut state = crate::domain::ConvergenceState::new(ParameterVector::default(), Default::default());
        state.status = ConvergenceStatus::Converged;
        state.report = Some(report_from_abundances(&s1, &s2));

        // No scripted reports: every probe errors.
        let mut engine = ScriptedEngine::new(vec![]);
        let gains = StepGains::default();
        let u = estimate(&mut engine, &sample_lines(), &state, WeightMode::Unweighted, &gains, &Perturbations::default())
            .unwrap();
        let abund: Vec<f64> = s1.iter().map(|s| s.1).collect();
        let ep: Vec<f64> = (0..12).map(|i| i as f64 * 0.1).collect();
        let fit = weighted_line_fit(&ep, &abund, &[1.0; 12]).unwrap();
        assert!((u.teff - fit.slope_stderr * gains.teff).abs() < 1e-9);
        assert_eq!(engine.calls(), 3);
        assert!((u.feh - std_dev(&abund).unwrap()).abs() < 1e-12);
    }
}
