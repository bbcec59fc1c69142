//! The per-star iteration loop and its two designed restarts.
//!
//! State machine: `Init → Iterating → {Converged | Failed | MaxIter}`.
//!
//! Each iteration evaluates the engine at the current parameters, aggregates the
//! report into a [`ResidualVector`] and, unless a terminal condition holds, moves
//! every free parameter using only its own residual:
//!
//! ```text
//! Teff   += g_T · EP-slope
//! vt     += g_v · RW-slope              (clamped to the valid vt range)
//! logg   += g_g · (A_I - A_II)
//! [Fe/H] += A_I - (A_sun + [Fe/H])
//! ```
//!
//! Restarts (microturbulence auto-fix, refine) are warm-started: the previous
//! parameter vector is passed in as data.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::{
    ConvergenceState, ConvergenceStatus, FixedFlags, ParameterVector, ResidualVector, Thresholds, WeightMode,
};
use crate::engine::SynthesisEngine;
use crate::error::JobError;
use crate::io::linelist::LineList;
use crate::solver::weighting::aggregate;

/// Gains of the coordinate-wise update rule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StepGains {
    pub teff: f64,
    pub vt: f64,
    pub logg: f64,
}

impl Default for StepGains {
    fn default() -> Self {
        Self {
            teff: 5000.0,
            vt: 5.0,
            logg: 1.5,
        }
    }
}

/// When a non-converged run counts as "stuck at the vt boundary".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VtEscape {
    pub low: f64,
    pub high: f64,
    /// |RW slope| above which the boundary is considered a failure to converge.
    pub rw_limit: f64,
}

impl Default for VtEscape {
    fn default() -> Self {
        Self {
            low: 0.05,
            high: 9.95,
            rw_limit: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub thresholds: Thresholds,
    pub max_iterations: usize,
    pub weights: WeightMode,
    pub gains: StepGains,
    /// Valid microturbulence range (km/s).
    pub vt_range: (f64, f64),
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            max_iterations: 160,
            weights: WeightMode::default(),
            gains: StepGains::default(),
            vt_range: (0.0, 10.0),
        }
    }
}

/// Whether `r` satisfies the criteria at parameters `p`.
///
/// With some parameter free, the criterion tied to a fixed parameter is waived
/// (EP ↔ Teff, RW ↔ vt, ionization balance ↔ logg). A free [Fe/H] additionally has
/// to match the stage-I abundance. With everything fixed, the three residual
/// criteria all apply.
pub fn meets_criteria(r: &ResidualVector, p: &ParameterVector, t: &Thresholds) -> bool {
    let fixed = p.fixed;
    let waive = |f: bool| f && !fixed.all_fixed();

    let ep_ok = waive(fixed.teff) || r.ep_slope.abs() < t.ep;
    let rw_ok = waive(fixed.vt) || r.rw_slope.abs() < t.rw;
    let ab_ok = waive(fixed.logg) || r.abundance_diff().abs() < t.abdiff;
    let feh_ok = fixed.feh || r.metallicity_offset(p.feh).abs() < t.abdiff;
    ep_ok && rw_ok && ab_ok && feh_ok
}

/// One coordinate-wise step. Fixed parameters are copied through untouched.
pub fn step(p: &ParameterVector, r: &ResidualVector, gains: &StepGains, vt_range: (f64, f64)) -> ParameterVector {
    let FixedFlags { teff, logg, feh, vt } = p.fixed;
    let mut next = *p;
    if !teff {
        next.teff = p.teff + gains.teff * r.ep_slope;
    }
    if !vt {
        next.vt = (p.vt + gains.vt * r.rw_slope).clamp(vt_range.0, vt_range.1);
    }
    if !logg {
        next.logg = p.logg + gains.logg * r.abundance_diff();
    }
    if !feh {
        next.feh = p.feh + r.metallicity_offset(p.feh);
    }
    next
}

/// Run the loop from `start` until a terminal state.
///
/// Errors (out of grid, missing Fe II, engine failure) abort the run; the caller
/// treats them as job failures.
pub fn solve<E: SynthesisEngine + ?Sized>(
    engine: &mut E,
    lines: &LineList,
    start: ParameterVector,
    config: &SolverConfig,
) -> Result<ConvergenceState, JobError> {
    let mut state = ConvergenceState::new(start, config.thresholds);
    state.status = ConvergenceStatus::Iterating;
    let all_fixed = start.fixed.all_fixed();

    loop {
        let report = engine.evaluate(&state.params, lines)?;
        let residuals = aggregate(&report, config.weights)?;
        state.iterations += 1;
        state.residuals = Some(residuals);
        state.report = Some(report);

        debug!(
            iteration = state.iterations,
            teff = state.params.teff,
            logg = state.params.logg,
            feh = state.params.feh,
            vt = state.params.vt,
            ep_slope = residuals.ep_slope,
            rw_slope = residuals.rw_slope,
            abundance_diff = residuals.abundance_diff(),
            "solver iteration"
        );

        if meets_criteria(&residuals, &state.params, &config.thresholds) {
            state.status = ConvergenceStatus::Converged;
            break;
        }
        if all_fixed {
            state.status = ConvergenceStatus::Failed;
            break;
        }
        if state.iterations >= config.max_iterations {
            state.status = ConvergenceStatus::MaxIter;
            break;
        }
        state.params = step(&state.params, &residuals, &config.gains, config.vt_range);
    }

    info!(
        status = ?state.status,
        iterations = state.iterations,
        params = %state.params,
        "solver finished"
    );
    Ok(state)
}

/// Whether `state` ended with vt pinned at a boundary while the RW slope is still large.
pub fn stuck_at_vt_boundary(state: &ConvergenceState, escape: &VtEscape) -> bool {
    let Some(r) = state.residuals else {
        return false;
    };
    let vt = state.params.vt;
    !state.converged()
        && !state.params.fixed.vt
        && (vt < escape.low || vt > escape.high)
        && r.rw_slope.abs() > escape.rw_limit
}

/// Microturbulence auto-fix: freeze vt and restart once from the last vector.
///
/// Returns `None` when the escape condition does not hold.
pub fn autofix_vt<E: SynthesisEngine + ?Sized>(
    engine: &mut E,
    lines: &LineList,
    state: &ConvergenceState,
    config: &SolverConfig,
    escape: &VtEscape,
) -> Result<Option<ConvergenceState>, JobError> {
    if !stuck_at_vt_boundary(state, escape) {
        return Ok(None);
    }
    let mut start = state.params;
    start.fixed.vt = true;
    info!(vt = start.vt, "microturbulence stuck at boundary; fixing it and restarting");
    solve(engine, lines, start, config).map(Some)
}

/// Refine pass: thresholds divided by three, warm-started at the converged vector.
///
/// The refined state replaces the original only when it converges too. Either way
/// the returned state carries the refined thresholds. Non-converged input is
/// returned unchanged.
pub fn refine<E: SynthesisEngine + ?Sized>(
    engine: &mut E,
    lines: &LineList,
    state: ConvergenceState,
    config: &SolverConfig,
) -> Result<ConvergenceState, JobError> {
    if !state.converged() {
        return Ok(state);
    }
    let refined_config = SolverConfig {
        thresholds: state.thresholds.refined(),
        ..*config
    };
    info!(thresholds = ?refined_config.thresholds, "refining converged parameters");
    let refined = solve(engine, lines, state.params, &refined_config)?;
    if refined.converged() {
        Ok(refined)
    } else {
        info!("refine pass did not converge; keeping previous parameters");
        Ok(ConvergenceState {
            thresholds: refined_config.thresholds,
            ..state
        })
    }
}
