//! Shell command execution for device adapters.
//!
//! Adapters never spawn processes directly; they go through a
//! [`CommandRunner`] so the daemon can use [`ShellRunner`] while tests
//! substitute a recording or simulating runner.
//!
//! # Example
//!
//! ```ignore
//! use l3gw_common::shell::{CommandRunner, ShellRunner, IPTABLES_CMD};
//!
//! let runner = ShellRunner;
//! let listing = runner.run_or_throw(&format!("{} -S -t filter", IPTABLES_CMD)).await?;
//! ```

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{L3Error, L3Result};

/// Default path to the `iptables` command.
pub const IPTABLES_CMD: &str = "/sbin/iptables";

/// Result of a shell command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    /// The stdout output.
    pub stdout: String,
    /// The stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Successful result carrying `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed result carrying `stderr`.
    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Converts a non-zero exit into [`L3Error::ShellCommandFailed`].
    pub fn into_stdout(self, cmd: &str) -> L3Result<String> {
        if self.success() {
            Ok(self.stdout)
        } else {
            Err(L3Error::ShellCommandFailed {
                command: cmd.to_string(),
                exit_code: self.exit_code,
                output: self.combined_output(),
            })
        }
    }
}

/// Executes a shell command asynchronously through `/bin/sh -c`.
///
/// Returns `Err` only if the command could not be spawned; a non-zero
/// exit is reported through [`ExecResult::exit_code`].
pub async fn exec(cmd: &str) -> L3Result<ExecResult> {
    tracing::debug!(command = %cmd, "Executing shell command");

    let output = Command::new("/bin/sh")
        .arg("-c")
        .arg(cmd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| L3Error::ShellExec {
            command: cmd.to_string(),
            source: e,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::trace!(command = %cmd, "Command succeeded");
    } else {
        tracing::warn!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Executes a shell command and fails on non-zero exit.
pub async fn exec_or_throw(cmd: &str) -> L3Result<String> {
    exec(cmd).await?.into_stdout(cmd)
}

/// Something that can execute device commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `cmd`, reporting non-zero exits through the result.
    async fn run(&self, cmd: &str) -> L3Result<ExecResult>;

    /// Runs `cmd` and returns stdout, failing on non-zero exit.
    async fn run_or_throw(&self, cmd: &str) -> L3Result<String> {
        self.run(cmd).await?.into_stdout(cmd)
    }
}

/// [`CommandRunner`] backed by the host shell.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, cmd: &str) -> L3Result<ExecResult> {
        exec(cmd).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output() {
        let result = ExecResult {
            exit_code: 1,
            stdout: "partial".to_string(),
            stderr: "iptables: No chain/target/match by that name.".to_string(),
        };
        assert_eq!(
            result.combined_output(),
            "partial\niptables: No chain/target/match by that name."
        );
        assert_eq!(ExecResult::ok("x").combined_output(), "x");
        assert_eq!(ExecResult::failed(2, "y").combined_output(), "y");
    }

    #[test]
    fn test_into_stdout_failure() {
        let err = ExecResult::failed(1, "Bad rule")
            .into_stdout("/sbin/iptables -D FORWARD -j nothing")
            .unwrap_err();
        match err {
            L3Error::ShellCommandFailed {
                command, exit_code, ..
            } => {
                assert!(command.contains("-D FORWARD"));
                assert_eq!(exit_code, 1);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_exec_success() {
        let result = exec("echo hello").await.unwrap();
        assert!(result.success());
        assert_eq!(result.stdout, "hello");
    }

    #[tokio::test]
    async fn test_exec_failure() {
        let result = exec("exit 3").await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(exec_or_throw("exit 3").await.is_err());
    }

    #[tokio::test]
    async fn test_shell_runner() {
        let out = ShellRunner.run_or_throw("printf 'a b'").await.unwrap();
        assert_eq!(out, "a b");
    }
}
