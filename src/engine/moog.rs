//! MOOG (`abfind` driver) behind the [`SynthesisEngine`] trait.
//!
//! Every evaluation rewrites the fixed-name scratch files in the job's workspace:
//!
//! - `out.atm`     interpolated model (KURUCZ deck)
//! - `lines.moog`  current line list
//! - `batch.par`   driver file naming the two above and `summary.out`
//!
//! then runs the executable there and parses `summary.out`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::trace;

use crate::domain::{EngineReport, EngineVersion, ParameterVector};
use crate::engine::SynthesisEngine;
use crate::engine::process::run_with_timeout;
use crate::engine::report::parse_summary;
use crate::error::JobError;
use crate::grid::{GridInterpolator, write_kurucz};
use crate::io::linelist::LineList;

pub const PARAMS_FILE: &str = "batch.par";
pub const MODEL_FILE: &str = "out.atm";
pub const LINES_FILE: &str = "lines.moog";
pub const SUMMARY_FILE: &str = "summary.out";

#[derive(Debug, Clone)]
pub struct MoogConfig {
    pub executable: PathBuf,
    pub version: EngineVersion,
    pub timeout: Duration,
}

impl Default for MoogConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("MOOGSILENT"),
            version: EngineVersion::default(),
            timeout: Duration::from_secs(120),
        }
    }
}

pub fn batch_par() -> String {
    format!(
        "abfind\n\
terminal       null\n\
atmosphere     1\n\
molecules      1\n\
lines          1\n\
flux/int       0\n\
damping        1\n\
plot           0\n\
units          0\n\
standard_out   'result.out'\n\
summary_out    '{SUMMARY_FILE}'\n\
model_in       '{MODEL_FILE}'\n\
lines_in       '{LINES_FILE}'\n"
    )
}

pub struct MoogEngine {
    interpolator: GridInterpolator,
    config: MoogConfig,
    workspace: PathBuf,
    evaluations: usize,
    /// Inputs of the evaluation whose summary is currently in the workspace.
    last_input: Option<(ParameterVector, String, usize)>,
}

impl MoogEngine {
    /// `workspace` must exist and belong to this engine alone.
    pub fn new(interpolator: GridInterpolator, config: MoogConfig, workspace: PathBuf) -> Self {
        Self {
            interpolator,
            config,
            workspace,
            evaluations: 0,
            last_input: None,
        }
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    pub fn summary_path(&self) -> PathBuf {
        self.workspace.join(SUMMARY_FILE)
    }

    fn write_inputs(&self, params: &ParameterVector, lines: &LineList) -> Result<(), JobError> {
        let model = self.interpolator.model_at(params.teff, params.logg, params.feh)?;
        write_kurucz(&self.workspace.join(MODEL_FILE), &model, params)?;

        let lines_path = self.workspace.join(LINES_FILE);
        std::fs::write(&lines_path, lines.to_text())
            .map_err(|e| JobError::io(format!("writing '{}'", lines_path.display()), e))?;

        let par_path = self.workspace.join(PARAMS_FILE);
        std::fs::write(&par_path, batch_par())
            .map_err(|e| JobError::io(format!("writing '{}'", par_path.display()), e))
    }
}

impl SynthesisEngine for MoogEngine {
    fn evaluate(&mut self, params: &ParameterVector, lines: &LineList) -> Result<EngineReport, JobError> {
        self.write_inputs(params, lines)?;

        // A stale summary must never be mistaken for this evaluation's output.
        self.last_input = None;
        let summary = self.summary_path();
        if summary.exists() {
            std::fs::remove_file(&summary)
                .map_err(|e| JobError::io(format!("removing stale '{}'", summary.display()), e))?;
        }

        let status = run_with_timeout(&self.config.executable, &[], &self.workspace, self.config.timeout)?;
        self.evaluations += 1;
        if !status.success() {
            return Err(JobError::EngineInvocation(format!(
                "'{}' exited with {status}",
                self.config.executable.display()
            )));
        }

        let text = std::fs::read_to_string(&summary).map_err(|e| {
            JobError::EngineInvocation(format!("missing report '{}': {e}", summary.display()))
        })?;
        let report = parse_summary(&text, self.config.version)?;
        self.last_input = Some((*params, lines.name.clone(), lines.len()));
        trace!(%params, abundances = ?report.average_abundances, "engine evaluation");
        Ok(report)
    }

    fn archive_report(&mut self, params: &ParameterVector, lines: &LineList, dest: &Path) -> Result<bool, JobError> {
        let current = matches!(
            &self.last_input,
            Some((p, name, n)) if p == params && *name == lines.name && *n == lines.len()
        );
        if !current {
            self.evaluate(params, lines)?;
        }
        let summary = self.summary_path();
        std::fs::copy(&summary, dest).map_err(|e| {
            JobError::io(format!("archiving '{}' to '{}'", summary.display(), dest.display()), e)
        })?;
        Ok(true)
    }
}
