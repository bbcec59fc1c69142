//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - stellar parameters and their fixed tags (`ParameterVector`, `FixedFlags`)
//! - per-job configuration (`JobOptions` and its enums)
//! - engine output and solver state (`EngineReport`, `ResidualVector`, `ConvergenceState`)
//! - final outputs (`Uncertainties`, `StarResult`)

pub mod types;

pub use types::*;
