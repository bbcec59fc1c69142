//! Command-line parsing for the spectroscopic parameter solver.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the solver and engine code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{GridKind, InterpolationMode};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "specpar",
    version,
    about = "Stellar parameters from equivalent widths via an external line-synthesis engine"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Default log level (overridden by RUST_LOG).
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    /// Also write plain-text logs to this file.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Solve every job in a jobs file and append the results table.
    Run(RunArgs),
    /// Interpolate one atmosphere model and write it as a KURUCZ deck.
    Interpolate(InterpolateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    /// Jobs file: one `<linelist> [teff logg feh vt] [options]` per line.
    #[arg(default_value = "StarMe.cfg")]
    pub jobs_file: PathBuf,

    /// Directory holding the line lists named in the jobs file.
    #[arg(long, default_value = "linelist")]
    pub linelist_dir: PathBuf,

    /// Root of the atmosphere grids (one subdirectory per grid kind).
    #[arg(long, env = "SPECPAR_GRID_DIR", default_value = "models")]
    pub grid_dir: PathBuf,

    /// Line-synthesis engine executable.
    #[arg(long, env = "SPECPAR_ENGINE", default_value = "MOOGSILENT")]
    pub engine: PathBuf,

    /// Tab-separated results table (appended to unless --overwrite).
    #[arg(long, default_value = "results.csv")]
    pub results: PathBuf,

    /// Directory for archived engine reports.
    #[arg(long, default_value = "results")]
    pub results_dir: PathBuf,

    /// Truncate the results table and rewrite its header.
    #[arg(long)]
    pub overwrite: bool,

    /// Also write results and skipped jobs as JSON.
    #[arg(long)]
    pub json: Option<PathBuf>,

    /// Root for per-job scratch workspaces (defaults to the system temp dir).
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,

    /// Keep per-job workspaces after the run.
    #[arg(long)]
    pub keep_workspaces: bool,

    /// Jobs to run concurrently.
    #[arg(short = 'j', long, default_value_t = 1)]
    pub jobs: usize,

    /// Per-invocation engine timeout in seconds.
    #[arg(long, default_value_t = 120)]
    pub timeout_secs: u64,

    /// File with wavelengths (one per line) of lines unsuited to cool stars.
    #[arg(long)]
    pub cool_lines: Option<PathBuf>,

    /// Command printing `teff feh` for a line-list path (used by the `tmcalc` option).
    #[arg(long)]
    pub initial_guess_cmd: Option<PathBuf>,

    /// Lower vt boundary for the microturbulence auto-fix.
    #[arg(long, default_value_t = 0.05)]
    pub vt_low: f64,

    /// Upper vt boundary for the microturbulence auto-fix.
    #[arg(long, default_value_t = 9.95)]
    pub vt_high: f64,

    /// |RW slope| above which a boundary vt counts as stuck.
    #[arg(long, default_value_t = 0.05)]
    pub vt_rw_limit: f64,
}

#[derive(Debug, Args, Clone)]
pub struct InterpolateArgs {
    #[arg(long)]
    pub teff: f64,

    #[arg(long)]
    pub logg: f64,

    #[arg(long, allow_hyphen_values = true)]
    pub feh: f64,

    /// Microturbulence written into the deck (km/s).
    #[arg(long, default_value_t = 1.0)]
    pub vt: f64,

    /// Root of the atmosphere grids.
    #[arg(long, env = "SPECPAR_GRID_DIR", default_value = "models")]
    pub grid_dir: PathBuf,

    /// Grid kind (kurucz95, apogee_kurucz, marcs).
    #[arg(long, default_value = "kurucz95")]
    pub model: GridKind,

    /// Interpolation scheme (trilinear, polynomial).
    #[arg(long, default_value = "trilinear")]
    pub interp: InterpolationMode,

    /// Output deck.
    #[arg(short, long, default_value = "out.atm")]
    pub output: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_defaults() {
        let cli = Cli::try_parse_from(["specpar", "run"]).unwrap();
        let Command::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.jobs_file, PathBuf::from("StarMe.cfg"));
        assert_eq!(args.jobs, 1);
        assert_eq!(args.timeout_secs, 120);
        assert!(!args.overwrite);
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn interpolate_parses_enums_and_negative_metallicity() {
        let cli = Cli::try_parse_from([
            "specpar",
            "interpolate",
            "--teff",
            "5777",
            "--logg",
            "4.44",
            "--feh",
            "-0.25",
            "--model",
            "marcs",
            "--interp",
            "polynomial",
            "--log-level",
            "debug",
        ])
        .unwrap();
        let Command::Interpolate(args) = cli.command else {
            panic!("expected interpolate");
        };
        assert_eq!(args.feh, -0.25);
        assert_eq!(args.model, GridKind::Marcs);
        assert_eq!(args.interp, InterpolationMode::Polynomial);
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn unknown_grid_kind_is_rejected() {
        assert!(
            Cli::try_parse_from(["specpar", "interpolate", "--teff", "5777", "--logg", "4.4", "--feh", "0", "--model", "atlas"])
                .is_err()
        );
    }
}
