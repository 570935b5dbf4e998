//! Tool command execution
//!
//! Runs policy-checked commands through `sh -c` in the working directory
//! with a per-invocation timeout. The child is spawned with kill-on-drop
//! so a timed-out future takes the subprocess down with it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{ToolError, ToolPolicy};

/// Default per-invocation timeout
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 30;

/// Captured output of a tool invocation
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Executes allow-listed shell commands in a working directory
pub struct ToolExecutor {
    policy: ToolPolicy,
    work_dir: PathBuf,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(policy: ToolPolicy, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            policy,
            work_dir: work_dir.into(),
            timeout: Duration::from_secs(DEFAULT_TOOL_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Run a command, optionally feeding `stdin` to it.
    ///
    /// The command is policy-checked first. A non-zero exit status is not
    /// an error; callers get the exit code alongside both streams.
    pub async fn run(&self, command: &str, stdin: Option<&str>) -> Result<ToolOutput, ToolError> {
        self.policy.check(command)?;
        debug!(%command, has_stdin = stdin.is_some(), work_dir = %self.work_dir.display(), "ToolExecutor::run");

        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&self.work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });

        let mut child = cmd.spawn()?;

        if let Some(input) = stdin {
            let mut child_stdin = child
                .stdin
                .take()
                .ok_or_else(|| std::io::Error::other("failed to open child stdin"))?;
            child_stdin.write_all(input.as_bytes()).await?;
            // Dropping the handle closes the pipe so the child sees EOF
            drop(child_stdin);
        }

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                warn!(%command, timeout_secs = self.timeout.as_secs(), "tool command timed out");
                return Err(ToolError::Timeout {
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let result = ToolOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        };
        debug!(exit_code = result.exit_code, stdout_len = result.stdout.len(), "ToolExecutor::run: complete");
        Ok(result)
    }
}
