//! Starting points for the solver.
//!
//! A job either carries explicit initial values, names a spectral type, asks an
//! external estimator, or falls back to solar values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::domain::{DEFAULT_FEH, DEFAULT_LOGG, DEFAULT_TEFF, ParameterVector};
use crate::engine::process::output_with_timeout;
use crate::error::JobError;

/// Gravity boundary between the dwarf and giant microturbulence relations.
pub const DWARF_LOGG_LIMIT: f64 = 3.95;

/// (class+subclass, Teff, logg) per luminosity class.
const DWARFS: &[(&str, f64, f64)] = &[
    ("B5", 15700.0, 4.00),
    ("A0", 9700.0, 4.10),
    ("A5", 8080.0, 4.20),
    ("F0", 7220.0, 4.30),
    ("F2", 6810.0, 4.30),
    ("F5", 6510.0, 4.35),
    ("F8", 6170.0, 4.40),
    ("G0", 5920.0, 4.40),
    ("G2", 5777.0, 4.44),
    ("G5", 5660.0, 4.50),
    ("G8", 5490.0, 4.50),
    ("K0", 5280.0, 4.50),
    ("K2", 5040.0, 4.55),
    ("K5", 4450.0, 4.60),
    ("K7", 4050.0, 4.65),
    ("M0", 3850.0, 4.70),
    ("M2", 3560.0, 4.80),
    ("M5", 3060.0, 5.00),
];

const SUBGIANTS: &[(&str, f64, f64)] = &[
    ("F0", 7000.0, 3.80),
    ("F5", 6400.0, 3.90),
    ("G0", 5900.0, 3.90),
    ("G5", 5600.0, 3.80),
    ("K0", 5100.0, 3.70),
];

const GIANTS: &[(&str, f64, f64)] = &[
    ("F5", 6400.0, 3.20),
    ("G0", 5600.0, 2.90),
    ("G5", 5050.0, 2.70),
    ("G8", 4900.0, 2.60),
    ("K0", 4750.0, 2.50),
    ("K2", 4500.0, 2.30),
    ("K5", 4000.0, 1.90),
    ("M0", 3850.0, 1.60),
];

/// Empirical microturbulence: dwarf relation for `logg ≥ 3.95`, giant relation
/// below; rounded to 0.01 km/s.
pub fn empirical_vt(teff: f64, logg: f64, feh: f64) -> f64 {
    let vt = if logg >= DWARF_LOGG_LIMIT {
        6.932e-4 * teff - 0.348 * logg - 1.437
    } else {
        2.72 - 0.457 * logg + 0.072 * feh
    };
    (vt * 100.0).round() / 100.0
}

/// Shape check for spectral types: at most five ASCII characters, no half subclasses.
pub fn check_spectral_type(spt: &str) -> Result<(), String> {
    if spt.is_empty() || spt.len() > 5 || !spt.is_ascii() {
        return Err(format!("spectral type '{spt}' must look like F8V"));
    }
    if spt.contains('.') {
        return Err(format!("half spectral types are not supported ({spt})"));
    }
    Ok(())
}

/// Teff and logg for a spectral type such as `G2V` or `K0III`.
///
/// Malformed types are rejected; unknown types fall back to solar values.
pub fn spectral_type_params(spt: &str) -> Result<(f64, f64), JobError> {
    check_spectral_type(spt).map_err(|message| JobError::ConfigParse { line: 0, message })?;
    let (class, lum) = spt.split_at(spt.len().min(2));
    let table = match lum {
        "V" => Some(DWARFS),
        "IV" => Some(SUBGIANTS),
        "III" => Some(GIANTS),
        _ => None,
    };
    let hit = table.and_then(|t| t.iter().find(|(c, _, _)| *c == class));
    match hit {
        Some(&(_, teff, logg)) => Ok((teff, logg)),
        None => {
            warn!(spectral_type = spt, "unknown spectral type; using solar values");
            Ok((DEFAULT_TEFF, DEFAULT_LOGG))
        }
    }
}

/// Starting vector for a spectral type: [Fe/H] = 0, empirical vt.
pub fn from_spectral_type(spt: &str) -> Result<ParameterVector, JobError> {
    let (teff, logg) = spectral_type_params(spt)?;
    Ok(ParameterVector::new(teff, logg, DEFAULT_FEH, empirical_vt(teff, logg, DEFAULT_FEH)))
}

/// Anything that can produce a starting vector from a line-list file.
pub trait InitialGuessEstimator: Send + Sync {
    fn estimate(&self, linelist: &Path) -> Result<ParameterVector, JobError>;
}

/// Runs an external program with the line-list path and reads `teff feh` from stdout.
#[derive(Debug, Clone)]
pub struct CommandEstimator {
    pub program: PathBuf,
    pub timeout: Duration,
}

impl CommandEstimator {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl InitialGuessEstimator for CommandEstimator {
    fn estimate(&self, linelist: &Path) -> Result<ParameterVector, JobError> {
        // The program runs next to the list, so it gets the bare file name.
        let cwd = linelist
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let file_name = linelist.file_name().ok_or_else(|| JobError::LineList {
            path: linelist.to_path_buf(),
            message: "not a file path".into(),
        })?;
        let arg = file_name.to_string_lossy();
        let stdout = output_with_timeout(&self.program, &[arg.as_ref()], cwd, self.timeout)?;
        let (teff, feh) = parse_estimate(&stdout).ok_or_else(|| {
            JobError::EngineInvocation(format!(
                "'{}' printed no 'teff feh' pair: {:?}",
                self.program.display(),
                stdout.trim()
            ))
        })?;
        debug!(teff, feh, "external initial guess");
        Ok(ParameterVector::new(teff, DEFAULT_LOGG, feh, empirical_vt(teff, DEFAULT_LOGG, feh)))
    }
}

/// First line with two leading numbers wins.
fn parse_estimate(stdout: &str) -> Option<(f64, f64)> {
    stdout.lines().find_map(|line| {
        let mut it = line.split_whitespace().map(str::parse::<f64>);
        match (it.next(), it.next()) {
            (Some(Ok(teff)), Some(Ok(feh))) if teff.is_finite() && feh.is_finite() => Some((teff, feh)),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empirical_vt_uses_both_relations() {
        // Solar dwarf.
        let expected = ((6.932e-4 * 5777.0 - 0.348 * 4.44 - 1.437) * 100.0_f64).round() / 100.0;
        assert_eq!(empirical_vt(5777.0, 4.44, 0.0), expected);
        assert!((empirical_vt(5777.0, 4.44, 0.0) - 1.02).abs() < 1e-12);
        // Giant.
        assert!((empirical_vt(4750.0, 2.5, -0.2) - 1.56).abs() < 1e-12);
    }

    #[test]
    fn spectral_types_resolve() {
        assert_eq!(spectral_type_params("G2V").unwrap(), (5777.0, 4.44));
        assert_eq!(spectral_type_params("K0III").unwrap(), (4750.0, 2.50));
        assert_eq!(spectral_type_params("Q9V").unwrap(), (DEFAULT_TEFF, DEFAULT_LOGG));
        assert!(spectral_type_params("G2.5V").is_err());
        assert!(spectral_type_params("G2VIII").is_err());

        let p = from_spectral_type("K0III").unwrap();
        assert_eq!(p.feh, 0.0);
        assert_eq!(p.vt, empirical_vt(4750.0, 2.5, 0.0));
    }

    #[test]
    fn estimate_output_parsing() {
        assert_eq!(parse_estimate("5712 0.03\n"), Some((5712.0, 0.03)));
        assert_eq!(parse_estimate("calibrating...\n5400.5  -0.21  extra\n"), Some((5400.5, -0.21)));
        assert_eq!(parse_estimate("nothing here\n"), None);
    }

    #[cfg(unix)]
    #[test]
    fn command_estimator_runs_the_program() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("guess.sh");
        std::fs::write(&script, "#!/bin/sh\necho \"5600 -0.10\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let list = dir.path().join("star.moog");
        std::fs::write(&list, "header\n").unwrap();

        let p = CommandEstimator::new(&script, Duration::from_secs(5)).estimate(&list).unwrap();
        assert_eq!(p.teff, 5600.0);
        assert_eq!(p.logg, DEFAULT_LOGG);
        assert_eq!(p.feh, -0.10);
        assert_eq!(p.vt, empirical_vt(5600.0, DEFAULT_LOGG, -0.10));
    }

    #[cfg(unix)]
    #[test]
    fn command_estimator_finds_lists_given_relative_paths() {
        use std::os::unix::fs::PermissionsExt;

        // `tempdir_in(".")` yields a path relative to the test's working directory.
        let dir = tempfile::tempdir_in(".").unwrap();
        assert!(dir.path().is_relative());
        let lists = dir.path().join("linelist");
        std::fs::create_dir(&lists).unwrap();
        std::fs::write(lists.join("star.moog"), "header\n").unwrap();

        let script = std::fs::canonicalize(dir.path()).unwrap().join("guess.sh");
        std::fs::write(&script, "#!/bin/sh\ntest -f \"$1\" && echo \"5600 0.0\"\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let p = CommandEstimator::new(&script, Duration::from_secs(5))
            .estimate(&lists.join("star.moog"))
            .unwrap();
        assert_eq!(p.teff, 5600.0);
        assert_eq!(p.feh, 0.0);
    }
}
