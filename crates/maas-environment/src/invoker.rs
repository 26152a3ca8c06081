// Copyright (C) 2025 MCP-as-a-Service
// SPDX-License-Identifier: AGPL-3.0-or-later
//! External process invocation.
//!
//! Runs one OS command to completion under a hard wall-clock timeout and
//! reports exit code, stdout, and stderr. No retries; the caller decides
//! what a failure means.

use std::time::Duration;

use tokio::process::Command;
use tracing::warn;

/// Exit code reported when the command cannot be spawned.
pub const EXIT_SPAWN_FAILED: i32 = 127;
/// Exit code reported when the command exceeds the timeout and is killed.
pub const EXIT_TIMED_OUT: i32 = 124;

/// Outcome of one external process run.
#[derive(Debug, Clone)]
pub struct RunProcessResult {
    /// Process exit code; non-zero on any failure, including spawn errors
    /// and timeouts.
    pub exit_code: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl RunProcessResult {
    /// Whether the process exited successfully.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stderr when non-empty, stdout otherwise. Docker writes its
    /// diagnostics to either depending on the verb.
    pub fn failure_detail(&self) -> &str {
        if self.stderr.is_empty() { &self.stdout } else { &self.stderr }
    }
}

/// Invoker for external commands with a fixed timeout.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    timeout: Duration,
}

impl ProcessInvoker {
    /// Create an invoker with the given per-command timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Run `command` (program followed by its arguments) to completion.
    ///
    /// The child is killed when the timeout elapses; in that case the result
    /// carries [`EXIT_TIMED_OUT`]. Spawn failures carry [`EXIT_SPAWN_FAILED`]
    /// with the OS error in stderr.
    pub async fn run(&self, command: &[String]) -> RunProcessResult {
        let Some((program, args)) = command.split_first() else {
            return RunProcessResult {
                exit_code: EXIT_SPAWN_FAILED,
                stdout: String::new(),
                stderr: "empty command".to_string(),
            };
        };

        let mut cmd = Command::new(program);
        cmd.args(args).kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return RunProcessResult {
                    exit_code: EXIT_SPAWN_FAILED,
                    stdout: String::new(),
                    stderr: e.to_string(),
                };
            }
            Err(_elapsed) => {
                warn!(program = %program, timeout_secs = self.timeout.as_secs(), "Command timed out, killed");
                return RunProcessResult {
                    exit_code: EXIT_TIMED_OUT,
                    stdout: String::new(),
                    stderr: format!("timed out after {}s", self.timeout.as_secs()),
                };
            }
        };

        RunProcessResult {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

impl Default for ProcessInvoker {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let invoker = ProcessInvoker::default();
        let result = invoker.run(&args(&["echo", "hello"])).await;
        assert!(result.success());
        assert_eq!(result.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported() {
        let invoker = ProcessInvoker::default();
        let result = invoker.run(&args(&["sh", "-c", "echo oops >&2; exit 3"])).await;
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.failure_detail().trim(), "oops");
    }

    #[tokio::test]
    async fn spawn_failure_is_nonzero() {
        let invoker = ProcessInvoker::default();
        let result = invoker.run(&args(&["/nonexistent/definitely-not-a-binary"])).await;
        assert_eq!(result.exit_code, EXIT_SPAWN_FAILED);
        assert!(!result.stderr.is_empty());
    }

    #[tokio::test]
    async fn timeout_kills_the_process() {
        let invoker = ProcessInvoker::new(Duration::from_millis(100));
        let start = std::time::Instant::now();
        let result = invoker.run(&args(&["sleep", "5"])).await;
        assert_eq!(result.exit_code, EXIT_TIMED_OUT);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn empty_command_is_rejected() {
        let invoker = ProcessInvoker::default();
        let result = invoker.run(&[]).await;
        assert_eq!(result.exit_code, EXIT_SPAWN_FAILED);
    }
}
