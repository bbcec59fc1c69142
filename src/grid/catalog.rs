//! Grid directory index and bracketing-model lookup.
//!
//! File names encode the model parameters:
//!
//! ```text
//! 5750g45.m05.gz   ->  Teff 5750 K, logg 4.5, [Fe/H] -0.5
//! 6000g40.p02.gz   ->  Teff 6000 K, logg 4.0, [Fe/H] +0.2
//! ```
//!
//! Names that do not follow this pattern are ignored, so grids can carry README files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::{GridKind, InterpolationMode};
use crate::error::JobError;

/// A single tabulated model on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct GridEntry {
    pub teff: f64,
    pub logg: f64,
    pub feh: f64,
    pub path: PathBuf,
}

/// Models surrounding a target, ordered Teff-major, then logg, then [Fe/H].
///
/// `paths.len() == teffs.len() * loggs.len() * fehs.len()`. An axis whose target
/// lies exactly on a grid value carries that value twice (zero-width bracket).
#[derive(Debug, Clone, PartialEq)]
pub struct BracketSet {
    pub teffs: Vec<f64>,
    pub loggs: Vec<f64>,
    pub fehs: Vec<f64>,
    pub paths: Vec<PathBuf>,
}

impl BracketSet {
    pub fn index(&self, it: usize, il: usize, ife: usize) -> usize {
        (it * self.loggs.len() + il) * self.fehs.len() + ife
    }
}

#[derive(Debug, Clone)]
pub struct GridCatalog {
    dir: PathBuf,
    by_key: HashMap<(i64, i64, i64), PathBuf>,
    teffs: Vec<f64>,
    loggs: Vec<f64>,
    fehs: Vec<f64>,
}

/// Parse `<teff>g<logg*10>.<p|m><|feh|*10>.gz`.
pub fn parse_grid_name(name: &str) -> Option<(f64, f64, f64)> {
    let stem = name.strip_suffix(".gz")?;
    let (head, metal) = stem.split_once('.')?;
    let (teff, logg) = head.split_once('g')?;
    let teff: f64 = teff.parse().ok()?;
    let logg: f64 = logg.parse::<u32>().ok()? as f64 / 10.0;

    let (sign, digits) = metal.split_at_checked(1)?;
    let magnitude = digits.parse::<u32>().ok()? as f64 / 10.0;
    let feh = match sign {
        "p" => magnitude,
        "m" => -magnitude,
        _ => return None,
    };
    Some((teff, logg, feh))
}

/// Inverse of [`parse_grid_name`].
pub fn grid_file_name(teff: f64, logg: f64, feh: f64) -> String {
    let sign = if feh < 0.0 { 'm' } else { 'p' };
    format!(
        "{}g{:02}.{sign}{:02}.gz",
        teff.round() as i64,
        (logg * 10.0).round() as i64,
        (feh.abs() * 10.0).round() as i64
    )
}

fn key(teff: f64, logg: f64, feh: f64) -> (i64, i64, i64) {
    (
        teff.round() as i64,
        (logg * 100.0).round() as i64,
        (feh * 100.0).round() as i64,
    )
}

fn sorted_unique(mut v: Vec<f64>) -> Vec<f64> {
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    v.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
    v
}

/// Low/high grid values around `x`; `(v, v)` when `x` sits on a grid value.
pub fn bracket_axis(values: &[f64], x: f64) -> Option<(f64, f64)> {
    let first = *values.first()?;
    let last = *values.last()?;
    if !x.is_finite() || x < first - 1e-9 || x > last + 1e-9 {
        return None;
    }
    if let Some(&v) = values.iter().find(|v| (*v - x).abs() < 1e-9) {
        return Some((v, v));
    }
    let hi_idx = values.iter().position(|&v| v > x)?;
    Some((values[hi_idx - 1], values[hi_idx]))
}

/// Up to four axis values around `x` (two each side where the grid allows,
/// shifted inward at the edges).
pub fn nearest_four(values: &[f64], x: f64) -> Option<Vec<f64>> {
    let (lo, _) = bracket_axis(values, x)?;
    if values.len() <= 4 {
        return Some(values.to_vec());
    }
    let lo_idx = values.iter().position(|&v| (v - lo).abs() < 1e-9)?;
    let start = lo_idx.saturating_sub(1).min(values.len() - 4);
    Some(values[start..start + 4].to_vec())
}

impl GridCatalog {
    /// Index `<grid_root>/<kind>/`.
    pub fn scan(grid_root: &Path, kind: GridKind) -> Result<Self, JobError> {
        let dir = grid_root.join(kind.dir_name());
        let read = std::fs::read_dir(&dir)
            .map_err(|e| JobError::io(format!("reading grid directory '{}'", dir.display()), e))?;

        let mut entries = Vec::new();
        for item in read {
            let item = item.map_err(|e| JobError::io(format!("listing '{}'", dir.display()), e))?;
            let name = item.file_name();
            let Some((teff, logg, feh)) = parse_grid_name(&name.to_string_lossy()) else {
                continue;
            };
            entries.push(GridEntry {
                teff,
                logg,
                feh,
                path: item.path(),
            });
        }
        if entries.is_empty() {
            return Err(JobError::OutOfGrid(format!(
                "no grid models found in '{}'",
                dir.display()
            )));
        }
        Ok(Self::from_entries(dir, entries))
    }

    pub fn from_entries(dir: PathBuf, entries: Vec<GridEntry>) -> Self {
        let teffs = sorted_unique(entries.iter().map(|e| e.teff).collect());
        let loggs = sorted_unique(entries.iter().map(|e| e.logg).collect());
        let fehs = sorted_unique(entries.iter().map(|e| e.feh).collect());
        let by_key = entries
            .into_iter()
            .map(|e| (key(e.teff, e.logg, e.feh), e.path))
            .collect();
        Self {
            dir,
            by_key,
            teffs,
            loggs,
            fehs,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn path_of(&self, teff: f64, logg: f64, feh: f64) -> Option<&PathBuf> {
        self.by_key.get(&key(teff, logg, feh))
    }

    /// Bracketing models for `mode`, or `OutOfGrid` when the target (or any
    /// required corner) is not tabulated.
    pub fn locate(&self, mode: InterpolationMode, teff: f64, logg: f64, feh: f64) -> Result<BracketSet, JobError> {
        let out_of_grid = |axis: &str, value: f64, values: &[f64]| {
            JobError::OutOfGrid(format!(
                "{axis}={value} outside [{}, {}] of '{}'",
                values.first().copied().unwrap_or(f64::NAN),
                values.last().copied().unwrap_or(f64::NAN),
                self.dir.display()
            ))
        };

        let (tl, th) = bracket_axis(&self.teffs, teff).ok_or_else(|| out_of_grid("teff", teff, &self.teffs))?;
        let (gl, gh) = bracket_axis(&self.loggs, logg).ok_or_else(|| out_of_grid("logg", logg, &self.loggs))?;
        let (fl, fh) = bracket_axis(&self.fehs, feh).ok_or_else(|| out_of_grid("feh", feh, &self.fehs))?;

        let teffs = match mode {
            InterpolationMode::Trilinear => vec![tl, th],
            InterpolationMode::Polynomial if tl == th => vec![tl],
            InterpolationMode::Polynomial => {
                nearest_four(&self.teffs, teff).ok_or_else(|| out_of_grid("teff", teff, &self.teffs))?
            }
        };
        let (loggs, fehs) = match mode {
            InterpolationMode::Trilinear => (vec![gl, gh], vec![fl, fh]),
            InterpolationMode::Polynomial => (collapse(gl, gh), collapse(fl, fh)),
        };

        let mut paths = Vec::with_capacity(teffs.len() * loggs.len() * fehs.len());
        for &t in &teffs {
            for &g in &loggs {
                for &f in &fehs {
                    let path = self.path_of(t, g, f).ok_or_else(|| {
                        JobError::OutOfGrid(format!(
                            "missing corner model {} for target Teff={teff} logg={logg} [Fe/H]={feh}",
                            grid_file_name(t, g, f)
                        ))
                    })?;
                    paths.push(path.clone());
                }
            }
        }

        Ok(BracketSet {
            teffs,
            loggs,
            fehs,
            paths,
        })
    }
}

fn collapse(lo: f64, hi: f64) -> Vec<f64> {
    if lo == hi { vec![lo] } else { vec![lo, hi] }
}
