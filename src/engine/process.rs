//! Blocking subprocess execution with a hard timeout.

use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::JobError;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run `program` in `cwd` with stdout/stderr discarded.
///
/// The child is killed and reaped if it outlives `timeout`; that is reported as
/// `EngineInvocation`, as is failure to spawn.
pub fn run_with_timeout(
    program: &Path,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<ExitStatus, JobError> {
    let child = spawn(program, args, cwd, Stdio::null())?;
    wait_with_timeout(child, program, timeout)
}

/// Like [`run_with_timeout`] but returns the child's stdout.
///
/// A non-zero exit is an error here.
pub fn output_with_timeout(
    program: &Path,
    args: &[&str],
    cwd: &Path,
    timeout: Duration,
) -> Result<String, JobError> {
    let mut child = spawn(program, args, cwd, Stdio::piped())?;
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| JobError::EngineInvocation(format!("no stdout from '{}'", program.display())))?;
    // Drain on a separate thread so a chatty child cannot block on a full pipe.
    let reader = std::thread::spawn(move || {
        let mut buf = String::new();
        stdout.read_to_string(&mut buf).map(|_| buf)
    });

    let status = wait_with_timeout(child, program, timeout)?;
    let text = reader
        .join()
        .map_err(|_| JobError::EngineInvocation(format!("reading output of '{}' panicked", program.display())))?
        .map_err(|e| JobError::io(format!("reading output of '{}'", program.display()), e))?;
    if !status.success() {
        return Err(JobError::EngineInvocation(format!(
            "'{}' exited with {status}",
            program.display()
        )));
    }
    Ok(text)
}

fn spawn(program: &Path, args: &[&str], cwd: &Path, stdout: Stdio) -> Result<Child, JobError> {
    Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| JobError::EngineInvocation(format!("failed to start '{}': {e}", program.display())))
}

fn wait_with_timeout(mut child: Child, program: &Path, timeout: Duration) -> Result<ExitStatus, JobError> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(program = %program.display(), elapsed_ms = started.elapsed().as_millis() as u64, "subprocess finished");
                return Ok(status);
            }
            Ok(None) if started.elapsed() >= timeout => {
                warn!(program = %program.display(), timeout_s = timeout.as_secs_f64(), "subprocess timed out; killing");
                let _ = child.kill();
                let _ = child.wait();
                return Err(JobError::EngineInvocation(format!(
                    "'{}' exceeded the {:.1}s timeout",
                    program.display(),
                    timeout.as_secs_f64()
                )));
            }
            Ok(None) => std::thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(JobError::EngineInvocation(format!(
                    "waiting for '{}' failed: {e}",
                    program.display()
                )));
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn quick_command_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let status = run_with_timeout(Path::new("true"), &[], dir.path(), Duration::from_secs(5)).unwrap();
        assert!(status.success());
    }

    #[test]
    fn hanging_command_is_killed() {
        let dir = tempfile::tempdir().unwrap();
        let started = Instant::now();
        let err = run_with_timeout(Path::new("sleep"), &["5"], dir.path(), Duration::from_millis(100)).unwrap_err();
        assert_eq!(err.kind(), "engine_invocation");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = run_with_timeout(
            Path::new("definitely-not-an-engine-binary"),
            &[],
            dir.path(),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "engine_invocation");
    }

    #[test]
    fn captures_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let out = output_with_timeout(Path::new("echo"), &["5712", "0.03"], dir.path(), Duration::from_secs(5)).unwrap();
        assert_eq!(out.trim(), "5712 0.03");
    }

    #[test]
    fn failing_command_output_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = output_with_timeout(Path::new("false"), &[], dir.path(), Duration::from_secs(5)).unwrap_err();
        assert_eq!(err.kind(), "engine_invocation");
    }
}
