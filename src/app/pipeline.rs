//! Run controller.
//!
//! One job is a fixed sequence:
//! line list -> initial guess -> solve -> outlier policy -> Teff-range pruning ->
//! vt auto-fix -> refine -> archive report -> uncertainties -> result row.
//!
//! Every job error is caught here and turned into a [`SkippedJob`]; the batch keeps
//! going. Jobs run on a rayon pool, each with its own engine and workspace.

use std::path::{Path, PathBuf};
use std::time::Duration;

use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::app::context::{JobContext, RunScratch};
use crate::domain::{ConvergenceState, JobOptions, ParameterVector, SkippedJob, StarResult, Uncertainties};
use crate::engine::{MoogConfig, MoogEngine, SynthesisEngine};
use crate::error::{AppError, JobError};
use crate::grid::{GridCatalog, GridInterpolator};
use crate::initial::{InitialGuessEstimator, from_spectral_type};
use crate::io::jobs::{JobDescriptor, JobFile};
use crate::io::linelist::{LineList, read_linelist, write_linelist};
use crate::solver::{
    OutlierOutcome, Perturbations, SolverConfig, StepGains, VtEscape, apply_policy, autofix_vt, estimate, refine, solve,
};

/// Converged Teff above which a warning is logged when cool-star lines are present.
pub const HOT_TEFF_WARNING: f64 = 7000.0;
/// Converged Teff below which cool-star lines are removed.
pub const COOL_TEFF_LIMIT: f64 = 5200.0;
pub const TEFFRANGE_SUFFIX: &str = "teffrange";

/// Run-wide settings collected from the CLI.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub linelist_dir: PathBuf,
    pub grid_dir: PathBuf,
    /// Where archived engine reports go.
    pub results_dir: PathBuf,
    pub scratch_dir: PathBuf,
    pub engine: PathBuf,
    /// Program printing `teff feh` for a line list (the `tmcalc` option).
    pub initial_guess_cmd: Option<PathBuf>,
    pub timeout: Duration,
    /// Jobs running concurrently.
    pub jobs: usize,
    pub keep_workspaces: bool,
    pub gains: StepGains,
    pub vt_escape: VtEscape,
    pub vt_range: (f64, f64),
    pub probes: Perturbations,
    /// Wavelengths of lines unsuited to cool stars.
    pub cool_lines: Vec<f64>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            linelist_dir: PathBuf::from("linelist"),
            grid_dir: PathBuf::from("models"),
            results_dir: PathBuf::from("results"),
            scratch_dir: std::env::temp_dir().join("specpar"),
            engine: MoogConfig::default().executable,
            initial_guess_cmd: None,
            timeout: MoogConfig::default().timeout,
            jobs: 1,
            keep_workspaces: false,
            gains: StepGains::default(),
            vt_escape: VtEscape::default(),
            vt_range: SolverConfig::default().vt_range,
            probes: Perturbations::default(),
            cool_lines: Vec::new(),
        }
    }
}

/// Builds one engine per job.
pub trait EngineFactory: Sync {
    type Engine: SynthesisEngine;

    fn create(&self, job: &JobDescriptor, workspace: &Path) -> Result<Self::Engine, JobError>;
}

/// Production factory: MOOG over the grid selected by the job's options.
#[derive(Debug, Clone)]
pub struct MoogFactory {
    pub grid_dir: PathBuf,
    pub executable: PathBuf,
    pub timeout: Duration,
}

impl MoogFactory {
    pub fn from_settings(settings: &RunSettings) -> Self {
        Self {
            grid_dir: settings.grid_dir.clone(),
            executable: settings.engine.clone(),
            timeout: settings.timeout,
        }
    }
}

impl EngineFactory for MoogFactory {
    type Engine = MoogEngine;

    fn create(&self, job: &JobDescriptor, workspace: &Path) -> Result<MoogEngine, JobError> {
        let options = &job.options;
        let catalog = GridCatalog::scan(&self.grid_dir, options.model)?;
        let interpolator = GridInterpolator::new(catalog, options.interpolation);
        let config = MoogConfig {
            executable: self.executable.clone(),
            version: options.engine_version,
            timeout: self.timeout,
        };
        Ok(MoogEngine::new(interpolator, config, workspace.to_path_buf()))
    }
}

/// Everything a finished job produced.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub result: StarResult,
    pub state: ConvergenceState,
    pub uncertainties: Uncertainties,
    /// Final line list (derived when lines were removed).
    pub lines: LineList,
    pub archived: Option<PathBuf>,
}

/// Batch results in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub results: Vec<StarResult>,
    pub skipped: Vec<SkippedJob>,
}

pub fn solver_config(options: &JobOptions, settings: &RunSettings) -> SolverConfig {
    SolverConfig {
        thresholds: options.thresholds,
        max_iterations: options.max_iterations,
        weights: options.weights,
        gains: settings.gains,
        vt_range: settings.vt_range,
    }
}

/// Starting vector: explicit values, then the external estimator, then the
/// spectral type, then solar defaults. The job's fixed flags are applied last.
pub fn initial_guess(
    job: &JobDescriptor,
    linelist_path: &Path,
    estimator: Option<&dyn InitialGuessEstimator>,
) -> Result<ParameterVector, JobError> {
    let options = &job.options;
    let start = if let Some(p) = job.initial {
        p
    } else if options.estimate_initial {
        let estimator = estimator.ok_or_else(|| JobError::ConfigParse {
            line: job.line_no,
            message: "tmcalc requested but no initial-guess command is configured".into(),
        })?;
        estimator.estimate(linelist_path)?
    } else if let Some(spt) = &options.spectral_type {
        from_spectral_type(spt)?
    } else {
        ParameterVector::default()
    };
    Ok(start.with_fixed(options.fixed))
}

/// Remove cool-star lines from a cool converged solution and re-run.
///
/// Returns `None` when the check does not apply.
fn prune_cool_lines<E: SynthesisEngine + ?Sized>(
    engine: &mut E,
    current: &OutlierOutcome,
    config: &SolverConfig,
    options: &JobOptions,
    cool_lines: &[f64],
) -> Result<Option<OutlierOutcome>, JobError> {
    if !current.state.converged() {
        return Ok(None);
    }
    let present: Vec<f64> = cool_lines
        .iter()
        .copied()
        .filter(|w| current.lines.contains_wavelength(*w))
        .collect();
    if present.is_empty() {
        return Ok(None);
    }

    let teff = current.state.params.teff;
    if teff > HOT_TEFF_WARNING {
        warn!(teff, lines = present.len(), "hot star measured with lines unsuited to this temperature range");
        return Ok(None);
    }
    if teff >= COOL_TEFF_LIMIT {
        return Ok(None);
    }

    let pruned = current.lines.without_wavelengths(&present, TEFFRANGE_SUFFIX);
    if pruned.is_empty() {
        warn!("Teff-range pruning would remove every line; skipped");
        return Ok(None);
    }
    info!(teff, removed = present.len(), list = %pruned.name, "removing lines unsuited to cool stars");
    let rerun = solve(engine, &pruned, current.state.params, config)?;
    let mut outcome = apply_policy(engine, &pruned, rerun, config, options.outlier, options.sigma)?;
    let mut removed = current.removed.clone();
    removed.extend(present);
    removed.append(&mut outcome.removed);
    outcome.removed = removed;
    Ok(Some(outcome))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

/// Result row named after the list actually solved (derived lists included).
/// Teff to whole kelvin, everything else to 0.01.
pub fn star_result(job: &JobDescriptor, lines: &LineList, state: &ConvergenceState, u: &Uncertainties) -> StarResult {
    let p = &state.params;
    let options = &job.options;
    StarResult {
        linelist: lines.name.clone(),
        teff: p.teff.round(),
        tefferr: u.teff.round(),
        logg: round_to(p.logg, 2),
        loggerr: round_to(u.logg, 2),
        feh: round_to(p.feh, 2),
        feherr: round_to(u.feh, 2),
        vt: round_to(p.vt, 2),
        vterr: round_to(u.vt, 2),
        loggastero: round_to(u.logg_astero, 2),
        dloggastero: round_to(u.logg_astero_err, 2),
        logg_lc: round_to(u.logg_lc, 2),
        dlogg_lc: round_to(u.logg_lc_err, 2),
        convergence: state.converged(),
        fixteff: p.fixed.teff,
        fixlogg: p.fixed.logg,
        fixfeh: p.fixed.feh,
        fixvt: p.fixed.vt,
        outlier: options.outlier.label().to_string(),
        weights: options.weights.label().to_string(),
        model: options.model.dir_name().to_string(),
        refine: options.refine,
        ep_crit: state.thresholds.ep,
        rw_crit: state.thresholds.rw,
        abdiff_crit: state.thresholds.abdiff,
    }
}

/// Archive name of the final engine report, after the list actually solved.
pub fn archive_name(list: &LineList, converged: bool) -> String {
    let stem = match list.name.rfind('.') {
        Some(idx) if idx > 0 => &list.name[..idx],
        _ => list.name.as_str(),
    };
    if converged {
        format!("{stem}.out")
    } else {
        format!("{stem}.NC.out")
    }
}

/// Run one job start to finish.
pub fn run_job<F: EngineFactory>(
    ctx: &JobContext,
    job: &JobDescriptor,
    settings: &RunSettings,
    factory: &F,
    estimator: Option<&dyn InitialGuessEstimator>,
) -> Result<JobOutcome, JobError> {
    let options = &job.options;
    let list_path = settings.linelist_dir.join(&job.linelist);
    let lines = read_linelist(&list_path)?;
    let start = initial_guess(job, &list_path, estimator)?;
    info!(lines = lines.len(), start = %start, "job started");

    let mut engine = factory.create(job, &ctx.workspace)?;
    let config = solver_config(options, settings);

    let state = solve(&mut engine, &lines, start, &config)?;
    let mut current = apply_policy(&mut engine, &lines, state, &config, options.outlier, options.sigma)?;

    if options.teff_range {
        if let Some(pruned) = prune_cool_lines(&mut engine, &current, &config, options, &settings.cool_lines)? {
            current = pruned;
        }
    }

    let OutlierOutcome {
        mut state,
        lines: final_lines,
        removed,
    } = current;

    if options.autofix_vt {
        if let Some(fixed) = autofix_vt(&mut engine, &final_lines, &state, &config, &settings.vt_escape)? {
            state = fixed;
        }
    }
    if options.refine {
        state = refine(&mut engine, &final_lines, state, &config)?;
    }

    if final_lines.is_derived() {
        let path = write_linelist(&settings.linelist_dir, &final_lines)?;
        info!(path = %path.display(), removed = removed.len(), "wrote derived line list");
    }

    let dest = settings.results_dir.join(archive_name(&final_lines, state.converged()));
    let archived = engine
        .archive_report(&state.params, &final_lines, &dest)?
        .then_some(dest);

    let uncertainties = estimate(
        &mut engine,
        &final_lines,
        &state,
        options.weights,
        &settings.gains,
        &settings.probes,
    )?;
    let result = star_result(job, &final_lines, &state, &uncertainties);
    info!(
        converged = result.convergence,
        teff = result.teff,
        logg = result.logg,
        feh = result.feh,
        vt = result.vt,
        iterations = state.iterations,
        "job finished"
    );

    Ok(JobOutcome {
        result,
        state,
        uncertainties,
        lines: final_lines,
        archived,
    })
}

fn skipped(line_no: usize, linelist: &str, err: &JobError) -> SkippedJob {
    SkippedJob {
        line_no,
        linelist: linelist.to_string(),
        kind: err.kind().to_string(),
        message: err.to_string(),
    }
}

fn run_isolated<F: EngineFactory>(
    scratch: &RunScratch,
    index: usize,
    job: &JobDescriptor,
    settings: &RunSettings,
    factory: &F,
    estimator: Option<&dyn InitialGuessEstimator>,
) -> Result<StarResult, SkippedJob> {
    let ctx = JobContext::create(index, job, scratch.path()).map_err(|e| {
        error!(line = job.line_no, linelist = %job.linelist, error = %e, "could not prepare job");
        skipped(job.line_no, &job.linelist, &e)
    })?;
    let _entered = ctx.span.enter();

    let outcome = run_job(&ctx, job, settings, factory, estimator);
    if !settings.keep_workspaces {
        ctx.cleanup();
    }
    match outcome {
        Ok(out) => Ok(out.result),
        Err(e) => {
            error!(kind = e.kind(), error = %e, "job skipped");
            Err(skipped(job.line_no, &job.linelist, &e))
        }
    }
}

/// Run every job in `file`, in parallel, keeping input order.
///
/// Only setup failures (thread pool, scratch or results directories) are errors;
/// job failures end up in [`BatchOutcome::skipped`].
pub fn run_batch<F: EngineFactory>(
    file: &JobFile,
    settings: &RunSettings,
    factory: &F,
    estimator: Option<&dyn InitialGuessEstimator>,
) -> Result<BatchOutcome, AppError> {
    std::fs::create_dir_all(&settings.results_dir).map_err(|e| {
        AppError::new(
            2,
            format!("Failed to create directory '{}': {e}", settings.results_dir.display()),
        )
    })?;
    let scratch = RunScratch::create(&settings.scratch_dir, settings.keep_workspaces)?;
    info!(scratch = %scratch.path().display(), kept = scratch.is_kept(), "run workspace ready");
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.jobs.max(1))
        .thread_name(|i| format!("specpar-job-{i}"))
        .build()
        .map_err(|e| AppError::new(2, format!("Failed to start worker pool: {e}")))?;

    let mut outcome = BatchOutcome::default();
    for e in &file.errors {
        warn!(error = %e, "skipping malformed job line");
        let line = match e {
            JobError::ConfigParse { line, .. } => *line,
            _ => 0,
        };
        outcome.skipped.push(skipped(line, "", e));
    }

    info!(jobs = file.jobs.len(), workers = settings.jobs.max(1), "starting batch");
    let per_job: Vec<Result<StarResult, SkippedJob>> = pool.install(|| {
        file.jobs
            .par_iter()
            .enumerate()
            .map(|(index, job)| run_isolated(&scratch, index, job, settings, factory, estimator))
            .collect()
    });

    for r in per_job {
        match r {
            Ok(row) => outcome.results.push(row),
            Err(s) => outcome.skipped.push(s),
        }
    }
    info!(
        finished = outcome.results.len(),
        skipped = outcome.skipped.len(),
        "batch finished"
    );
    Ok(outcome)
}
