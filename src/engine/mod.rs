//! The line-synthesis engine boundary.
//!
//! The solver only ever sees [`SynthesisEngine`]: hand it parameters and a line list,
//! get back an [`EngineReport`]. The real implementation ([`moog::MoogEngine`]) writes
//! input files into a per-job workspace, runs the external program and parses its
//! summary; tests substitute scripted engines.

use std::path::Path;

use crate::domain::{EngineReport, ParameterVector};
use crate::error::JobError;
use crate::io::linelist::LineList;

pub mod moog;
pub mod process;
pub mod report;

pub use moog::{MoogConfig, MoogEngine};

/// Synchronous forward model.
///
/// One call = one engine evaluation. Implementations own their scratch state, so a
/// single instance must never be shared between concurrently running jobs.
pub trait SynthesisEngine {
    fn evaluate(&mut self, params: &ParameterVector, lines: &LineList) -> Result<EngineReport, JobError>;

    /// Copy the raw report for `params`/`lines` to `dest`, re-evaluating if the most
    /// recent evaluation was for different inputs. Returns `false` for engines
    /// without a file-based report.
    fn archive_report(&mut self, _params: &ParameterVector, _lines: &LineList, _dest: &Path) -> Result<bool, JobError> {
        Ok(false)
    }
}

impl<E: SynthesisEngine + ?Sized> SynthesisEngine for &mut E {
    fn evaluate(&mut self, params: &ParameterVector, lines: &LineList) -> Result<EngineReport, JobError> {
        (**self).evaluate(params, lines)
    }

    fn archive_report(&mut self, params: &ParameterVector, lines: &LineList, dest: &Path) -> Result<bool, JobError> {
        (**self).archive_report(params, lines, dest)
    }
}
