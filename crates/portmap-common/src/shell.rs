//! Bounded command execution for the port mapping daemon.
//!
//! Commands are spawned directly from an argument vector; no shell is
//! involved, so values never need quoting and are never re-split on
//! whitespace. Every execution is bounded by a timeout and observes a
//! caller-supplied [`CancellationToken`]. In both cases the child process
//! is killed.
//!
//! # Example
//!
//! ```ignore
//! use portmap_common::shell;
//! use tokio_util::sync::CancellationToken;
//!
//! let args = vec!["--version".to_string()];
//! let result = shell::exec("nft", &args, shell::DEFAULT_COMMAND_TIMEOUT, &CancellationToken::new()).await?;
//! ```

use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{PortMapError, PortMapResult};

/// The `nsenter` utility used to enter the host network namespace.
pub const NSENTER_CMD: &str = "nsenter";

/// The nftables control utility.
pub const NFT_CMD: &str = "nft";

/// PID whose network namespace is the host's primary namespace.
pub const HOST_NAMESPACE_PID: u32 = 1;

/// Upper bound for a single control command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Result of a command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecResult {
    /// The exit code of the command (0 = success, -1 = killed by signal).
    pub exit_code: i32,
    /// The stdout output.
    pub stdout: String,
    /// The stderr output.
    pub stderr: String,
}

impl ExecResult {
    /// Builds a successful result with the given stdout. Mostly useful for
    /// test doubles.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Builds a failed result with the given exit code and stderr.
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

    /// Returns the combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Renders a program and its arguments as a single line for logs and
/// error messages.
pub fn display_command(program: &str, args: &[String]) -> String {
    let mut line = String::from(program);
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

/// Executes a command, bounded by `timeout` and `cancel`.
///
/// Returns `Ok` for any command that ran to completion, whatever its exit
/// code; use [`ExecResult::success`] to check it.
///
/// # Errors
///
/// * [`PortMapError::Spawn`] - the process could not be started or waited on
/// * [`PortMapError::Timeout`] - the process outlived `timeout` and was killed
/// * [`PortMapError::Cancelled`] - `cancel` fired and the process was killed
pub async fn exec(
    program: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> PortMapResult<ExecResult> {
    let command = display_command(program, args);
    tracing::info!(command = %command, "Executing command");

    if cancel.is_cancelled() {
        return Err(PortMapError::Cancelled { command });
    }

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| PortMapError::Spawn {
            command: command.clone(),
            source: e,
        })?;

    // Dropping the wait future drops the child, and kill_on_drop reaps it.
    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            tracing::warn!(command = %command, "Command cancelled, killing process");
            return Err(PortMapError::Cancelled { command });
        }
        waited = tokio::time::timeout(timeout, child.wait_with_output()) => match waited {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(PortMapError::Spawn { command, source: e });
            }
            Err(_) => {
                tracing::error!(command = %command, timeout = ?timeout, "Command timed out, killing process");
                return Err(PortMapError::Timeout { command, timeout });
            }
        },
    };

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        tracing::info!(command = %command, output = %result.stdout, "Command succeeded");
    } else {
        tracing::error!(
            command = %command,
            exit_code = result.exit_code,
            output = %result.combined_output(),
            "Command failed"
        );
    }

    Ok(result)
}
