//! Job descriptor parsing.
//!
//! One job per line:
//!
//! ```text
//! <linelist> [teff logg feh vt] [opt,opt:value,...]
//! ```
//!
//! Lines starting with a non-alphanumeric character are comments. A malformed line
//! becomes a `ConfigParse` row error and is skipped; the rest of the file still runs.

use std::path::Path;

use crate::domain::{JobOptions, ParameterVector};
use crate::error::JobError;
use crate::initial::check_spectral_type;

/// One parsed job line.
#[derive(Debug, Clone, PartialEq)]
pub struct JobDescriptor {
    /// 1-based line number in the jobs file.
    pub line_no: usize,
    pub linelist: String,
    /// Explicit starting values, when the line carries four numbers.
    pub initial: Option<ParameterVector>,
    pub options: JobOptions,
}

/// Parse output: valid jobs in file order plus the lines that were rejected.
#[derive(Debug, Default)]
pub struct JobFile {
    pub jobs: Vec<JobDescriptor>,
    pub errors: Vec<JobError>,
}

pub fn read_jobs(path: &Path) -> Result<JobFile, JobError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| JobError::io(format!("reading jobs file '{}'", path.display()), e))?;
    Ok(parse_jobs(&text))
}

pub fn parse_jobs(text: &str) -> JobFile {
    let mut out = JobFile::default();
    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let trimmed = raw.trim();
        let Some(first) = trimmed.chars().next() else {
            continue;
        };
        if !first.is_alphanumeric() {
            continue;
        }
        match parse_job_line(line_no, trimmed) {
            Ok(job) => out.jobs.push(job),
            Err(e) => out.errors.push(e),
        }
    }
    out
}

fn config_error(line: usize, message: impl Into<String>) -> JobError {
    JobError::ConfigParse {
        line,
        message: message.into(),
    }
}

pub fn parse_job_line(line_no: usize, line: &str) -> Result<JobDescriptor, JobError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (initial_tokens, option_token) = match tokens.len() {
        1 => (None, None),
        2 => (None, Some(tokens[1])),
        5 => (Some(&tokens[1..5]), None),
        6 => (Some(&tokens[1..5]), Some(tokens[5])),
        n => {
            return Err(config_error(
                line_no,
                format!("expected 1, 2, 5 or 6 fields, found {n}"),
            ));
        }
    };

    let initial = initial_tokens
        .map(|t| parse_initial(line_no, t))
        .transpose()?;
    let options = match option_token {
        Some(s) => parse_options(s).map_err(|m| config_error(line_no, m))?,
        None => JobOptions::default(),
    };

    Ok(JobDescriptor {
        line_no,
        linelist: tokens[0].to_string(),
        initial,
        options,
    })
}

fn parse_initial(line_no: usize, tokens: &[&str]) -> Result<ParameterVector, JobError> {
    let mut values = [0.0; 4];
    for (slot, token) in values.iter_mut().zip(tokens) {
        *slot = token
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| config_error(line_no, format!("initial value '{token}' is not a number")))?;
    }
    let [teff, logg, feh, vt] = values;
    // Temperatures are whole kelvin.
    Ok(ParameterVector::new(teff.trunc(), logg, feh, vt))
}

fn parse_positive(key: &str, value: &str) -> Result<f64, String> {
    match value.parse::<f64>() {
        Ok(v) if v.is_finite() && v > 0.0 => Ok(v),
        _ => Err(format!("{key} must be a positive number, got '{value}'")),
    }
}

/// Parse the comma-separated option string.
pub fn parse_options(text: &str) -> Result<JobOptions, String> {
    let mut opts = JobOptions::default();
    for item in text.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some((key, value)) = item.split_once(':') {
            let value = value.trim();
            match key.trim() {
                "spt" => {
                    check_spectral_type(value)?;
                    opts.spectral_type = Some(value.to_string());
                }
                "weights" => opts.weights = value.parse()?,
                "model" => opts.model = value.parse()?,
                "interp" => opts.interpolation = value.parse()?,
                "iterations" => {
                    opts.max_iterations = match value.parse::<usize>() {
                        Ok(n) if n > 0 => n,
                        _ => return Err(format!("iterations must be a positive integer, got '{value}'")),
                    }
                }
                "EPcrit" => opts.thresholds.ep = parse_positive("EPcrit", value)?,
                "RWcrit" => opts.thresholds.rw = parse_positive("RWcrit", value)?,
                "ABdiffcrit" => opts.thresholds.abdiff = parse_positive("ABdiffcrit", value)?,
                "MOOGv" => opts.engine_version = value.parse()?,
                "outlier" => opts.outlier = value.parse()?,
                "sigma" => opts.sigma = parse_positive("sigma", value)?,
                other => return Err(format!("unknown option '{other}'")),
            }
        } else {
            match item {
                "teff" => opts.fixed.teff = true,
                "logg" => opts.fixed.logg = true,
                "feh" => opts.fixed.feh = true,
                "vt" => opts.fixed.vt = true,
                "refine" => opts.refine = true,
                "teffrange" => opts.teff_range = true,
                "autofixvt" => opts.autofix_vt = true,
                "tmcalc" => opts.estimate_initial = true,
                other => return Err(format!("unknown flag '{other}'")),
            }
        }
    }
    Ok(opts)
}
