//! Error types.
//!
//! Two layers:
//!
//! - [`JobError`]: everything that can go wrong while processing a single star. These are
//!   caught at the job boundary by the run controller and turned into skipped-job entries.
//! - [`AppError`]: process-level failures (bad CLI paths, unwritable results file) carrying
//!   the exit code for the binary.

use std::path::PathBuf;

use thiserror::Error;

/// Failure of a single job. Never propagates out of the batch loop.
#[derive(Debug, Error)]
pub enum JobError {
    /// Requested parameters fall outside the tabulated atmosphere grid.
    #[error("parameters outside the atmosphere grid: {0}")]
    OutOfGrid(String),

    /// The second ionization stage has no usable measured lines.
    #[error("missing ionization data: {0}")]
    MissingIonizationData(String),

    /// Engine timed out, exited abnormally, or produced a missing/malformed report.
    #[error("engine invocation failed: {0}")]
    EngineInvocation(String),

    /// Malformed job descriptor line.
    #[error("invalid job descriptor (line {line}): {message}")]
    ConfigParse { line: usize, message: String },

    /// Missing or unreadable line list.
    #[error("line list '{path}': {message}")]
    LineList { path: PathBuf, message: String },

    /// Unreadable or malformed atmosphere grid file.
    #[error("grid file '{path}': {message}")]
    GridFormat { path: PathBuf, message: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl JobError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Short machine-friendly label used in logs and the JSON export.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OutOfGrid(_) => "out_of_grid",
            Self::MissingIonizationData(_) => "missing_ionization_data",
            Self::EngineInvocation(_) => "engine_invocation",
            Self::ConfigParse { .. } => "config_parse",
            Self::LineList { .. } => "line_list",
            Self::GridFormat { .. } => "grid_format",
            Self::Io { .. } => "io",
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<JobError> for AppError {
    fn from(err: JobError) -> Self {
        Self::new(2, err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_error_converts_to_exit_code_two() {
        let err: AppError = JobError::OutOfGrid("teff=9000".into()).into();
        assert_eq!(err.exit_code(), 2);
        assert!(err.to_string().contains("teff=9000"));
    }

    #[test]
    fn kinds_are_stable() {
        let err = JobError::ConfigParse {
            line: 3,
            message: "bad".into(),
        };
        assert_eq!(err.kind(), "config_parse");
        assert!(err.to_string().contains("line 3"));
    }
}
