//! Per-run and per-job execution context.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::Span;

use crate::error::JobError;
use crate::io::jobs::JobDescriptor;

/// Scratch directory private to one batch run: `<root>/specpar-XXXXXX`.
///
/// Removed on drop unless the run keeps its workspaces.
#[derive(Debug)]
pub struct RunScratch {
    path: PathBuf,
    dir: Option<TempDir>,
}

impl RunScratch {
    pub fn create(root: &Path, keep: bool) -> Result<Self, JobError> {
        std::fs::create_dir_all(root)
            .map_err(|e| JobError::io(format!("creating scratch root '{}'", root.display()), e))?;
        let dir = tempfile::Builder::new()
            .prefix("specpar-")
            .tempdir_in(root)
            .map_err(|e| JobError::io(format!("creating run directory in '{}'", root.display()), e))?;
        let path = dir.path().to_path_buf();
        let dir = if keep {
            let _ = dir.keep();
            None
        } else {
            Some(dir)
        };
        Ok(Self { path, dir })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_kept(&self) -> bool {
        self.dir.is_none()
    }
}

/// What a single job owns while it runs: its scratch directory and log span.
#[derive(Debug)]
pub struct JobContext {
    /// Position in the jobs file (0-based, among valid jobs).
    pub index: usize,
    pub line_no: usize,
    pub linelist: String,
    pub workspace: PathBuf,
    pub span: Span,
}

impl JobContext {
    /// Create the job's workspace inside a run directory, wiping leftovers with
    /// the same index.
    pub fn create(index: usize, job: &JobDescriptor, scratch_root: &Path) -> Result<Self, JobError> {
        let stem = job.linelist.rsplit_once('.').map_or(job.linelist.as_str(), |(s, _)| s);
        let safe: String = stem
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let workspace = scratch_root.join(format!("job-{index:04}-{safe}"));
        if workspace.exists() {
            std::fs::remove_dir_all(&workspace)
                .map_err(|e| JobError::io(format!("clearing workspace '{}'", workspace.display()), e))?;
        }
        std::fs::create_dir_all(&workspace)
            .map_err(|e| JobError::io(format!("creating workspace '{}'", workspace.display()), e))?;

        let span = tracing::info_span!("job", index, line = job.line_no, linelist = %job.linelist);
        Ok(Self {
            index,
            line_no: job.line_no,
            linelist: job.linelist.clone(),
            workspace,
            span,
        })
    }

    /// Remove the workspace; failures are only logged.
    pub fn cleanup(&self) {
        if let Err(e) = std::fs::remove_dir_all(&self.workspace) {
            tracing::debug!(workspace = %self.workspace.display(), error = %e, "could not remove workspace");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::jobs::parse_job_line;

    #[test]
    fn workspaces_are_unique_and_sanitised() {
        let root = tempfile::tempdir().unwrap();
        let job = parse_job_line(2, "HD#1.moog").unwrap();
        let a = JobContext::create(0, &job, root.path()).unwrap();
        let b = JobContext::create(1, &job, root.path()).unwrap();
        assert_ne!(a.workspace, b.workspace);
        assert!(a.workspace.is_dir() && b.workspace.is_dir());
        assert!(a.workspace.file_name().unwrap().to_string_lossy().starts_with("job-0000-HD_1"));

        std::fs::write(a.workspace.join("stale"), "x").unwrap();
        let again = JobContext::create(0, &job, root.path()).unwrap();
        assert!(!again.workspace.join("stale").exists());
        again.cleanup();
        assert!(!again.workspace.exists());
    }

    #[test]
    fn concurrent_runs_never_share_workspaces() {
        let root = tempfile::tempdir().unwrap();
        let job = parse_job_line(1, "star.moog").unwrap();

        let run_a = RunScratch::create(root.path(), false).unwrap();
        let ctx_a = JobContext::create(0, &job, run_a.path()).unwrap();
        std::fs::write(ctx_a.workspace.join("out.atm"), "KURUCZ\n").unwrap();

        let run_b = RunScratch::create(root.path(), false).unwrap();
        let ctx_b = JobContext::create(0, &job, run_b.path()).unwrap();

        assert_ne!(ctx_a.workspace, ctx_b.workspace);
        assert!(ctx_a.workspace.join("out.atm").exists());
        assert!(run_a.path().file_name().unwrap().to_string_lossy().starts_with("specpar-"));
    }

    #[test]
    fn run_directory_is_removed_unless_kept() {
        let root = tempfile::tempdir().unwrap();
        let dropped = RunScratch::create(root.path(), false).unwrap();
        let dropped_path = dropped.path().to_path_buf();
        assert!(dropped_path.is_dir());
        drop(dropped);
        assert!(!dropped_path.exists());

        let kept = RunScratch::create(root.path(), true).unwrap();
        assert!(kept.is_kept());
        let kept_path = kept.path().to_path_buf();
        drop(kept);
        assert!(kept_path.is_dir());
    }
}
