//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - passed between the solver, the engine adapter and the outlier manager
//! - exported to the results table / JSON
//! - constructed directly in tests without touching the filesystem

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Solar iron abundance (log ε scale) used to translate Fe I abundance into [Fe/H].
pub const SOLAR_FE: f64 = 7.47;

/// Default starting point when a job gives no initial guess.
pub const DEFAULT_TEFF: f64 = 5777.0;
pub const DEFAULT_LOGG: f64 = 4.44;
pub const DEFAULT_FEH: f64 = 0.00;
pub const DEFAULT_VT: f64 = 1.00;

/// Which parameters are held fixed for a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedFlags {
    pub teff: bool,
    pub logg: bool,
    pub feh: bool,
    pub vt: bool,
}

impl FixedFlags {
    pub fn all_fixed(&self) -> bool {
        self.teff && self.logg && self.feh && self.vt
    }
}

/// (Teff, logg, [Fe/H], vt) plus the fixed tags.
///
/// The fixed tags are decided when a run is constructed; the solver never flips them.
/// The microturbulence auto-fix builds a *new* vector with `vt` fixed instead.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParameterVector {
    pub teff: f64,
    pub logg: f64,
    pub feh: f64,
    pub vt: f64,
    pub fixed: FixedFlags,
}

impl ParameterVector {
    pub fn new(teff: f64, logg: f64, feh: f64, vt: f64) -> Self {
        Self {
            teff,
            logg,
            feh,
            vt,
            fixed: FixedFlags::default(),
        }
    }

    pub fn with_fixed(mut self, fixed: FixedFlags) -> Self {
        self.fixed = fixed;
        self
    }
}

impl Default for ParameterVector {
    fn default() -> Self {
        Self::new(DEFAULT_TEFF, DEFAULT_LOGG, DEFAULT_FEH, DEFAULT_VT)
    }
}

impl fmt::Display for ParameterVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Teff={:.0} logg={:.2} [Fe/H]={:.2} vt={:.2}",
            self.teff, self.logg, self.feh, self.vt
        )
    }
}

/// Convergence thresholds on the three residual components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub ep: f64,
    pub rw: f64,
    pub abdiff: f64,
}

impl Thresholds {
    /// Thresholds for the refine pass: every criterion divided by three.
    pub fn refined(&self) -> Self {
        Self {
            ep: self.ep / 3.0,
            rw: self.rw / 3.0,
            abdiff: self.abdiff / 3.0,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            ep: 0.001,
            rw: 0.003,
            abdiff: 0.01,
        }
    }
}

/// How per-line abundances are aggregated into slopes and stage means.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeightMode {
    /// Use the engine's own regression slopes and averages.
    #[default]
    Unweighted,
    /// Per-line weights `1/(σ² + d²)` with `d` the deviation from the stage mean.
    InverseVariance,
    /// Huber weights scaled by the median absolute deviation.
    Mad,
}

impl WeightMode {
    /// Label written to the results table.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unweighted => "null",
            Self::InverseVariance => "sigma",
            Self::Mad => "mad",
        }
    }
}

impl FromStr for WeightMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "null" | "unweighted" => Ok(Self::Unweighted),
            "sigma" | "inverse-variance" => Ok(Self::InverseVariance),
            "mad" | "robust" => Ok(Self::Mad),
            other => Err(format!("unknown weighting mode '{other}' (expected null, sigma or mad)")),
        }
    }
}

/// Atmosphere grid family; each lives in its own subdirectory of the grid root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridKind {
    #[default]
    Kurucz95,
    ApogeeKurucz,
    Marcs,
}

impl GridKind {
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Kurucz95 => "kurucz95",
            Self::ApogeeKurucz => "apogee_kurucz",
            Self::Marcs => "marcs",
        }
    }
}

impl FromStr for GridKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kurucz95" => Ok(Self::Kurucz95),
            "apogee_kurucz" => Ok(Self::ApogeeKurucz),
            "marcs" => Ok(Self::Marcs),
            other => Err(format!(
                "unknown atmosphere grid '{other}' (expected kurucz95, apogee_kurucz or marcs)"
            )),
        }
    }
}

/// Post-convergence outlier removal policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutlierPolicy {
    #[default]
    None,
    /// Remove the worst line, re-run once.
    SingleOnce,
    /// Remove the worst line and re-run until nothing is flagged.
    SingleIterative,
    /// Remove every flagged line, re-run once.
    AllOnce,
    /// Remove every flagged line and re-run until nothing is flagged.
    AllIterative,
}

impl OutlierPolicy {
    pub fn label(&self) -> &'static str {
        match self {
            Self::None => "False",
            Self::SingleOnce => "1Once",
            Self::SingleIterative => "1Iter",
            Self::AllOnce => "allOnce",
            Self::AllIterative => "allIter",
        }
    }

    pub fn is_iterative(&self) -> bool {
        matches!(self, Self::SingleIterative | Self::AllIterative)
    }

    pub fn removes_all(&self) -> bool {
        matches!(self, Self::AllOnce | Self::AllIterative)
    }
}

impl FromStr for OutlierPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "False" | "false" | "none" => Ok(Self::None),
            "1Once" => Ok(Self::SingleOnce),
            "1Iter" => Ok(Self::SingleIterative),
            "allOnce" => Ok(Self::AllOnce),
            "allIter" => Ok(Self::AllIterative),
            other => Err(format!(
                "unknown outlier policy '{other}' (expected 1Once, 1Iter, allOnce, allIter or False)"
            )),
        }
    }
}

/// Engine release; controls the per-line column layout of the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineVersion {
    V2013,
    #[default]
    V2014,
}

impl EngineVersion {
    pub fn year(&self) -> u16 {
        match self {
            Self::V2013 => 2013,
            Self::V2014 => 2014,
        }
    }
}

impl FromStr for EngineVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let year: u16 = s
            .parse()
            .map_err(|_| format!("engine version must be a year, got '{s}'"))?;
        if year > 2013 {
            Ok(Self::V2014)
        } else if year == 2013 {
            Ok(Self::V2013)
        } else {
            Err(format!("unsupported engine version {year}"))
        }
    }
}

/// Grid interpolation scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterpolationMode {
    /// 8 bracketing models, trilinear.
    #[default]
    Trilinear,
    /// 4×2×2 models, axis-by-axis polynomial collapse.
    Polynomial,
}

impl FromStr for InterpolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trilinear" => Ok(Self::Trilinear),
            "polynomial" => Ok(Self::Polynomial),
            other => Err(format!("unknown interpolation '{other}' (expected trilinear or polynomial)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConvergenceStatus {
    Init,
    Iterating,
    Converged,
    Failed,
    MaxIter,
}

impl ConvergenceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Failed | Self::MaxIter)
    }
}

/// One row of the engine's per-line abundance table.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineAbundance {
    pub wavelength: f64,
    pub ep: f64,
    /// log10(EW / λ), the reduced equivalent width.
    pub log_rw: f64,
    pub abundance: f64,
}

/// Everything we read back from one engine evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineReport {
    /// One per species block, in report order (stage I first).
    pub ep_slopes: Vec<f64>,
    pub rw_slopes: Vec<f64>,
    pub average_abundances: Vec<f64>,
    /// Per-line rows, one vector per ionization stage.
    pub stages: Vec<Vec<LineAbundance>>,
}

impl EngineReport {
    pub fn stage(&self, idx: usize) -> &[LineAbundance] {
        self.stages.get(idx).map(|v| v.as_slice()).unwrap_or(&[])
    }
}

/// Residuals consumed by the update rule: EP slope, RW slope and the two stage means.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResidualVector {
    pub ep_slope: f64,
    pub rw_slope: f64,
    pub abundance_i: f64,
    pub abundance_ii: f64,
}

impl ResidualVector {
    pub fn abundance_diff(&self) -> f64 {
        self.abundance_i - self.abundance_ii
    }

    /// Offset between the stage I abundance and the metallicity of the model.
    pub fn metallicity_offset(&self, feh: f64) -> f64 {
        self.abundance_i - (SOLAR_FE + feh)
    }
}

/// Solver state after (or during) a run.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceState {
    pub iterations: usize,
    pub params: ParameterVector,
    pub residuals: Option<ResidualVector>,
    /// Report of the last evaluation; the outlier manager and error estimator read it.
    pub report: Option<EngineReport>,
    pub thresholds: Thresholds,
    pub status: ConvergenceStatus,
}

impl ConvergenceState {
    pub fn new(params: ParameterVector, thresholds: Thresholds) -> Self {
        Self {
            iterations: 0,
            params,
            residuals: None,
            report: None,
            thresholds,
            status: ConvergenceStatus::Init,
        }
    }

    pub fn converged(&self) -> bool {
        self.status == ConvergenceStatus::Converged
    }
}

/// A line flagged by sigma clipping.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outlier {
    pub deviation: f64,
    pub wavelength: f64,
    /// 0 for stage I, 1 for stage II.
    pub stage: usize,
}

/// Flagged lines ordered by decreasing deviation; empty when nothing qualifies.
pub type OutlierReport = Vec<Outlier>;

/// Final parameter uncertainties plus the two calibrated secondary gravities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Uncertainties {
    pub teff: f64,
    pub logg: f64,
    pub feh: f64,
    pub vt: f64,
    pub logg_astero: f64,
    pub logg_astero_err: f64,
    pub logg_lc: f64,
    pub logg_lc_err: f64,
}

/// Per-job options after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOptions {
    pub spectral_type: Option<String>,
    pub weights: WeightMode,
    pub model: GridKind,
    pub interpolation: InterpolationMode,
    pub fixed: FixedFlags,
    pub refine: bool,
    pub max_iterations: usize,
    pub thresholds: Thresholds,
    pub engine_version: EngineVersion,
    pub outlier: OutlierPolicy,
    pub teff_range: bool,
    pub autofix_vt: bool,
    pub estimate_initial: bool,
    pub sigma: f64,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            spectral_type: None,
            weights: WeightMode::default(),
            model: GridKind::default(),
            interpolation: InterpolationMode::default(),
            fixed: FixedFlags::default(),
            refine: false,
            max_iterations: 160,
            thresholds: Thresholds::default(),
            engine_version: EngineVersion::default(),
            outlier: OutlierPolicy::default(),
            teff_range: false,
            autofix_vt: false,
            estimate_initial: false,
            sigma: 3.0,
        }
    }
}

/// One row of the results table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StarResult {
    pub linelist: String,
    pub teff: f64,
    pub tefferr: f64,
    pub logg: f64,
    pub loggerr: f64,
    pub feh: f64,
    pub feherr: f64,
    pub vt: f64,
    pub vterr: f64,
    pub loggastero: f64,
    pub dloggastero: f64,
    #[serde(rename = "loggLC")]
    pub logg_lc: f64,
    #[serde(rename = "dloggLC")]
    pub dlogg_lc: f64,
    pub convergence: bool,
    pub fixteff: bool,
    pub fixlogg: bool,
    pub fixfeh: bool,
    pub fixvt: bool,
    pub outlier: String,
    pub weights: String,
    pub model: String,
    pub refine: bool,
    #[serde(rename = "EPcrit")]
    pub ep_crit: f64,
    #[serde(rename = "RWcrit")]
    pub rw_crit: f64,
    #[serde(rename = "ABdiffcrit")]
    pub abdiff_crit: f64,
}

/// A job that produced no result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedJob {
    pub line_no: usize,
    /// Empty when the descriptor line could not be parsed.
    pub linelist: String,
    pub kind: String,
    pub message: String,
}
