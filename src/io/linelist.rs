//! Line lists: the equivalent-width measurements fed to the engine.
//!
//! File layout (as produced by the upstream EW measurement step):
//!
//! ```text
//! <one free-form header line>
//!  4508.288      26.1      2.86    -2.440                         71.2
//!  ...
//! ```
//!
//! Columns: wavelength (Å), species id, excitation potential (eV), log gf, EW (mÅ).
//! A list is only ever shrunk; every removal yields a new list with a derived name.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::JobError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralLine {
    pub wavelength: f64,
    pub species: f64,
    pub ep: f64,
    pub loggf: f64,
    pub ew: f64,
}

impl SpectralLine {
    /// Ionization stage index (0 = neutral, 1 = singly ionized) from the species decimal.
    pub fn stage(&self) -> usize {
        let tenths = (self.species * 10.0).round() as i64;
        tenths.rem_euclid(10) as usize
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineList {
    /// File name of this list (e.g. `star.moog`, `star_outlier.moog`).
    pub name: String,
    /// File name of the list this one was derived from (equal to `name` for originals).
    pub source: String,
    pub header: String,
    pub lines: Vec<SpectralLine>,
}

impl LineList {
    pub fn new(name: impl Into<String>, lines: Vec<SpectralLine>) -> Self {
        let name = name.into();
        Self {
            source: name.clone(),
            header: format!("WAVELENGTH     ION      EP     LOGGF           EW ({name})"),
            name,
            lines,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn is_derived(&self) -> bool {
        self.name != self.source
    }

    /// Identifier used in result rows: the original file name without extension.
    pub fn stem(&self) -> &str {
        file_stem(&self.source)
    }

    /// New list without the given wavelengths (matched at 0.01 Å), named
    /// `<source stem>_<suffix>.moog`. `self` is left untouched.
    pub fn without_wavelengths(&self, wavelengths: &[f64], suffix: &str) -> LineList {
        let drop: Vec<i64> = wavelengths.iter().map(|w| centi(*w)).collect();
        let lines = self
            .lines
            .iter()
            .filter(|l| !drop.contains(&centi(l.wavelength)))
            .copied()
            .collect();
        LineList {
            name: format!("{}_{suffix}.moog", self.stem()),
            source: self.source.clone(),
            header: self.header.clone(),
            lines,
        }
    }

    pub fn contains_wavelength(&self, wavelength: f64) -> bool {
        let key = centi(wavelength);
        self.lines.iter().any(|l| centi(l.wavelength) == key)
    }

    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(64 * (self.lines.len() + 1));
        out.push_str(&self.header);
        out.push('\n');
        for l in &self.lines {
            out.push_str(&format!(
                "{:9.3} {:10.1} {:9.2} {:9.3} {:28.1}\n",
                l.wavelength, l.species, l.ep, l.loggf, l.ew
            ));
        }
        out
    }
}

fn centi(w: f64) -> i64 {
    (w * 100.0).round() as i64
}

fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    }
}

/// Parse line-list text. The first line is a header; blank lines are ignored.
pub fn parse_linelist(name: &str, text: &str) -> Result<LineList, JobError> {
    let mut rows = text.lines();
    let header = rows.next().unwrap_or_default().trim_end().to_string();

    let mut lines = Vec::new();
    for (idx, row) in rows.enumerate() {
        let trimmed = row.trim();
        if trimmed.is_empty() {
            continue;
        }
        let values: Result<Vec<f64>, _> = trimmed.split_whitespace().map(str::parse::<f64>).collect();
        let values = values.map_err(|e| JobError::LineList {
            path: name.into(),
            message: format!("row {}: {e}", idx + 2),
        })?;
        if values.len() < 5 {
            return Err(JobError::LineList {
                path: name.into(),
                message: format!("row {}: expected 5 columns, found {}", idx + 2, values.len()),
            });
        }
        lines.push(SpectralLine {
            wavelength: values[0],
            species: values[1],
            ep: values[2],
            loggf: values[3],
            ew: values[values.len() - 1],
        });
    }

    if lines.is_empty() {
        return Err(JobError::LineList {
            path: name.into(),
            message: "no lines".into(),
        });
    }

    Ok(LineList {
        name: name.to_string(),
        source: name.to_string(),
        header,
        lines,
    })
}

pub fn read_linelist(path: &Path) -> Result<LineList, JobError> {
    let text = std::fs::read_to_string(path).map_err(|e| JobError::LineList {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    parse_linelist(&name, &text)
}

/// Write `list` into `dir` under its own name and return the full path.
pub fn write_linelist(dir: &Path, list: &LineList) -> Result<std::path::PathBuf, JobError> {
    let path = dir.join(&list.name);
    std::fs::write(&path, list.to_text())
        .map_err(|e| JobError::io(format!("writing line list '{}'", path.display()), e))?;
    Ok(path)
}
