//! External process execution.
//!
//! [`ProcessRunner`] is the seam between the converter and the operating
//! system: production code spawns real executables through
//! [`CommandRunner`], tests substitute a fake that fabricates outputs.

use std::{
    ffi::OsString,
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use {async_trait::async_trait, tokio::process::Command, tracing::debug};

use crate::{Error, Result};

/// Maximum number of stderr bytes kept in a failure report.
const STDERR_TAIL_BYTES: usize = 600;

/// Captured result of one process run.
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last few hundred bytes of stderr, lossily decoded.
    pub fn stderr_tail(&self) -> String {
        let start = self.stderr.len().saturating_sub(STDERR_TAIL_BYTES);
        String::from_utf8_lossy(&self.stderr[start..])
            .trim()
            .to_string()
    }

    /// Turn a non-zero exit into [`Error::ProcessFailed`].
    pub fn check(self, program: &Path) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        let status = match self.code {
            Some(code) => format!("code {code}"),
            None => "signal".to_string(),
        };
        Err(Error::ProcessFailed {
            program: program_name(program),
            code: self.code,
            status,
            stderr: self.stderr_tail(),
        })
    }
}

/// Spawns an executable with an explicit argument vector. No retained state.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, program: &Path, args: &[OsString]) -> Result<ProcessOutput>;
}

/// [`ProcessRunner`] backed by `tokio::process`.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Kill the process if it runs longer than `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessRunner for CommandRunner {
    async fn run(&self, program: &Path, args: &[OsString]) -> Result<ProcessOutput> {
        debug!(program = %program.display(), ?args, "spawning process");

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Dropping the `output()` future on timeout kills the child.
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(Error::Spawn {
                    program: program_name(program),
                    source,
                });
            },
            Err(_) => {
                return Err(Error::TimedOut {
                    program: program_name(program),
                    secs: self.timeout.as_secs(),
                });
            },
        };

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Find a binary at an explicit path or in `PATH`.
///
/// A configured path that does not exist falls through to the `PATH` search.
pub fn find_binary(name: &str, configured: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = configured
        && path.is_file()
    {
        return Some(path.to_path_buf());
    }
    which::which(name).ok()
}

fn program_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_success_through() {
        let out = ProcessOutput {
            code: Some(0),
            ..Default::default()
        };
        assert!(out.check(Path::new("/usr/bin/ffmpeg")).is_ok());
    }

    #[test]
    fn check_reports_exit_code_and_stderr() {
        let out = ProcessOutput {
            code: Some(1),
            stdout: Vec::new(),
            stderr: b"Invalid data found when processing input\n".to_vec(),
        };
        let err = out.check(Path::new("/usr/bin/ffmpeg")).unwrap_err();
        match err {
            Error::ProcessFailed {
                program,
                code,
                stderr,
                ..
            } => {
                assert_eq!(program, "ffmpeg");
                assert_eq!(code, Some(1));
                assert_eq!(stderr, "Invalid data found when processing input");
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn stderr_tail_is_bounded() {
        let out = ProcessOutput {
            code: Some(1),
            stdout: Vec::new(),
            stderr: vec![b'x'; 10_000],
        };
        assert_eq!(out.stderr_tail().len(), STDERR_TAIL_BYTES);
    }

    #[test]
    fn find_binary_falls_back_to_path() {
        assert!(find_binary("ls", Some(Path::new("/definitely/not/here"))).is_some());
        assert!(find_binary("definitely-not-a-real-binary-xyz123", None).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_runner_reports_exit_codes() {
        let runner = CommandRunner::new();
        let ok = runner.run(Path::new("true"), &[]).await.unwrap();
        assert!(ok.success());
        let failed = runner.run(Path::new("false"), &[]).await.unwrap();
        assert!(!failed.success());
    }

    #[tokio::test]
    async fn command_runner_spawn_failure() {
        let runner = CommandRunner::new();
        let err = runner
            .run(Path::new("definitely-not-a-real-binary-xyz123"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }
}
