//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - installs logging
//! - runs a batch of jobs or a single interpolation
//! - writes the results table and optional JSON export

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use tracing::info;

use crate::cli::{Command, InterpolateArgs, RunArgs};
use crate::error::AppError;
use crate::initial::{CommandEstimator, InitialGuessEstimator};
use crate::logging::LogConfig;
use crate::solver::VtEscape;

pub mod context;
pub mod pipeline;

use pipeline::{MoogFactory, RunSettings};

/// Entry point for the `specpar` binary.
pub fn run() -> Result<(), AppError> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();
    let cli = crate::cli::Cli::parse();

    let _log_guard = crate::logging::init(&LogConfig {
        level: cli.log_level.clone(),
        file: cli.log_file.clone(),
    })?;

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Interpolate(args) => handle_interpolate(args),
    }
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let settings = run_settings_from_args(&args)?;
    let jobs = crate::io::jobs::read_jobs(&args.jobs_file)?;
    info!(
        jobs = jobs.jobs.len(),
        rejected = jobs.errors.len(),
        file = %args.jobs_file.display(),
        "read jobs file"
    );

    let estimator = settings
        .initial_guess_cmd
        .as_ref()
        .map(|cmd| CommandEstimator::new(cmd, settings.timeout));
    let factory = MoogFactory::from_settings(&settings);
    let batch = pipeline::run_batch(
        &jobs,
        &settings,
        &factory,
        estimator.as_ref().map(|e| e as &dyn InitialGuessEstimator),
    )?;

    crate::io::export::write_results_table(&args.results, &batch.results, args.overwrite)?;
    if let Some(path) = &args.json {
        crate::io::export::write_run_json(path, &batch.results, &batch.skipped)?;
    }

    println!("{}", crate::report::format_batch_summary(&batch.results, &batch.skipped));
    Ok(())
}

fn handle_interpolate(args: InterpolateArgs) -> Result<(), AppError> {
    let catalog = crate::grid::GridCatalog::scan(&args.grid_dir, args.model)?;
    let interpolator = crate::grid::GridInterpolator::new(catalog, args.interp);
    let model = interpolator.model_at(args.teff, args.logg, args.feh)?;
    let params = crate::domain::ParameterVector::new(args.teff, args.logg, args.feh, args.vt);
    crate::grid::write_kurucz(&args.output, &model, &params)?;
    println!(
        "Wrote {} ({} layers) for {params}",
        args.output.display(),
        model.layers.nrows()
    );
    Ok(())
}

/// Map CLI arguments to run-wide settings, validating paths up front.
pub fn run_settings_from_args(args: &RunArgs) -> Result<RunSettings, AppError> {
    if !args.linelist_dir.is_dir() {
        return Err(AppError::new(
            2,
            format!("Line-list directory '{}' does not exist", args.linelist_dir.display()),
        ));
    }
    if args.jobs == 0 {
        return Err(AppError::new(2, "--jobs must be at least 1"));
    }
    if args.vt_low >= args.vt_high {
        return Err(AppError::new(2, "--vt-low must be below --vt-high"));
    }
    let cool_lines = match &args.cool_lines {
        Some(path) => read_cool_lines(path)?,
        None => Vec::new(),
    };

    let defaults = RunSettings::default();
    Ok(RunSettings {
        linelist_dir: args.linelist_dir.clone(),
        grid_dir: args.grid_dir.clone(),
        results_dir: args.results_dir.clone(),
        scratch_dir: args.scratch_dir.clone().unwrap_or_else(|| defaults.scratch_dir.clone()),
        engine: resolve_program(&args.engine)?,
        initial_guess_cmd: args.initial_guess_cmd.as_deref().map(resolve_program).transpose()?,
        timeout: Duration::from_secs(args.timeout_secs.max(1)),
        jobs: args.jobs,
        keep_workspaces: args.keep_workspaces,
        vt_escape: VtEscape {
            low: args.vt_low,
            high: args.vt_high,
            rw_limit: args.vt_rw_limit,
        },
        cool_lines,
        ..defaults
    })
}

/// Programs run inside per-job workspaces, so a path with a directory part is
/// anchored to the caller's working directory. Bare names keep the PATH lookup.
pub fn resolve_program(program: &Path) -> Result<PathBuf, AppError> {
    if program.components().count() <= 1 {
        return Ok(program.to_path_buf());
    }
    std::path::absolute(program)
        .map_err(|e| AppError::new(2, format!("Cannot resolve program path '{}': {e}", program.display())))
}

/// One wavelength per line; blank lines and `#` comments are ignored.
pub fn read_cool_lines(path: &Path) -> Result<Vec<f64>, AppError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read cool-line list '{}': {e}", path.display())))?;
    parse_cool_lines(&text).map_err(|line| {
        AppError::new(
            2,
            format!("Invalid wavelength on line {line} of '{}'", path.display()),
        )
    })
}

fn parse_cool_lines(text: &str) -> Result<Vec<f64>, usize> {
    let mut out = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let first = line.split_whitespace().next().unwrap_or(line);
        match first.parse::<f64>() {
            Ok(w) if w.is_finite() && w > 0.0 => out.push(w),
            _ => return Err(idx + 1),
        }
    }
    Ok(out)
}
