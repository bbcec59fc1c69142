//! Post-convergence sigma clipping.
//!
//! Detection works on the per-line abundances of the last engine report: per
//! ionization stage, lines with `|a - mean| ≥ n·σ` (population σ) are flagged.
//! Stage II is only screened with more than [`MIN_STAGE_II_LINES`] lines.
//!
//! Removal never touches the input list: each pass derives `<stem>_outlier.moog`
//! and re-runs the solver warm-started at the previous converged vector.

use tracing::info;

use crate::domain::{ConvergenceState, EngineReport, Outlier, OutlierPolicy, OutlierReport};
use crate::engine::SynthesisEngine;
use crate::error::JobError;
use crate::io::linelist::LineList;
use crate::math::{mean, std_dev};
use crate::solver::convergence::{SolverConfig, solve};

pub const MIN_STAGE_II_LINES: usize = 10;
pub const OUTLIER_SUFFIX: &str = "outlier";

/// Flag lines deviating by at least `n` standard deviations, worst first.
pub fn detect_outliers(report: &EngineReport, n: f64) -> OutlierReport {
    let mut out = Vec::new();
    for (stage, rows) in report.stages.iter().enumerate().take(2) {
        if stage == 1 && rows.len() <= MIN_STAGE_II_LINES {
            continue;
        }
        let abund: Vec<f64> = rows.iter().map(|r| r.abundance).collect();
        let (Some(m), Some(s)) = (mean(&abund), std_dev(&abund)) else {
            continue;
        };
        if s <= 0.0 {
            continue;
        }
        for r in rows {
            let deviation = (r.abundance - m).abs();
            if deviation >= n * s {
                out.push(Outlier {
                    deviation,
                    wavelength: r.wavelength,
                    stage,
                });
            }
        }
    }
    out.sort_by(|a, b| {
        b.deviation
            .partial_cmp(&a.deviation)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.wavelength.partial_cmp(&b.wavelength).unwrap_or(std::cmp::Ordering::Equal))
    });
    out
}

/// Result of applying an outlier policy.
#[derive(Debug, Clone)]
pub struct OutlierOutcome {
    pub state: ConvergenceState,
    /// The list in use afterwards (derived if anything was removed).
    pub lines: LineList,
    pub removed: Vec<f64>,
}

/// Apply `policy` to a converged `state`.
///
/// Non-converged states and `OutlierPolicy::None` pass through unchanged.
/// Iterative policies stop when nothing is flagged, when a re-run fails to
/// converge, or when removal would leave no lines.
pub fn apply_policy<E: SynthesisEngine + ?Sized>(
    engine: &mut E,
    lines: &LineList,
    state: ConvergenceState,
    config: &SolverConfig,
    policy: OutlierPolicy,
    sigma: f64,
) -> Result<OutlierOutcome, JobError> {
    let mut outcome = OutlierOutcome {
        state,
        lines: lines.clone(),
        removed: Vec::new(),
    };
    if policy == OutlierPolicy::None {
        return Ok(outcome);
    }

    // Each pass removes at least one line, so the line count bounds the loop.
    for _ in 0..lines.len() {
        if !outcome.state.converged() {
            break;
        }
        let Some(report) = outcome.state.report.as_ref() else {
            break;
        };
        let flagged = detect_outliers(report, sigma);
        if flagged.is_empty() {
            break;
        }

        let drop: Vec<f64> = if policy.removes_all() {
            flagged.iter().map(|o| o.wavelength).collect()
        } else {
            vec![flagged[0].wavelength]
        };
        let trimmed = outcome.lines.without_wavelengths(&drop, OUTLIER_SUFFIX);
        if trimmed.is_empty() || trimmed.len() == outcome.lines.len() {
            break;
        }
        for w in &drop {
            info!(wavelength = *w, policy = policy.label(), "removing outlier line");
        }

        let rerun = solve(engine, &trimmed, outcome.state.params, config)?;
        outcome.removed.extend(drop);
        outcome.lines = trimmed;
        outcome.state = rerun;

        if !policy.is_iterative() {
            break;
        }
    }

    if !outcome.removed.is_empty() {
        info!(
            removed = outcome.removed.len(),
            list = %outcome.lines.name,
            "outlier removal finished"
        );
    }
    Ok(outcome)
}
