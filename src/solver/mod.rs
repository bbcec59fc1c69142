//! Parameter solver: residual aggregation, the convergence loop, outlier
//! rejection and error estimation.

pub mod convergence;
pub mod outliers;
pub mod uncertainty;
pub mod weighting;

pub use convergence::{SolverConfig, StepGains, VtEscape, autofix_vt, refine, solve};
pub use outliers::{OutlierOutcome, apply_policy, detect_outliers};
pub use uncertainty::{Perturbations, estimate};
