//! Mathematical utilities: weighted least squares and robust statistics.

pub mod ols;
pub mod stats;

pub use ols::*;
pub use stats::*;
