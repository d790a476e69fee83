//! Namespace-scoped `nft` execution.
//!
//! [`CommandRunner`] is the seam between the rule manager and the host:
//! the manager only ever hands it the nft argument vector. The production
//! implementation, [`NsenterRunner`], prefixes `nsenter -t <pid> -n nft`
//! so that every mutation lands in the host's primary network namespace
//! rather than the caller's container namespace.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{PortMapError, PortMapResult};
use crate::shell::{self, ExecResult};

/// Network namespace that commands are attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamespaceTarget {
    pid: u32,
}

impl NamespaceTarget {
    /// The host's primary network namespace (that of PID 1).
    pub fn host() -> Self {
        Self {
            pid: shell::HOST_NAMESPACE_PID,
        }
    }

    /// The network namespace of an arbitrary process.
    pub fn pid(pid: u32) -> Self {
        Self { pid }
    }

    /// Returns the target PID.
    pub fn target_pid(&self) -> u32 {
        self.pid
    }

    /// The `nsenter` arguments selecting this namespace, followed by `nft`.
    pub fn nsenter_prefix(&self) -> Vec<String> {
        vec![
            "-t".to_string(),
            self.pid.to_string(),
            "-n".to_string(),
            shell::NFT_CMD.to_string(),
        ]
    }
}

impl Default for NamespaceTarget {
    fn default() -> Self {
        Self::host()
    }
}

/// Executes nft commands on behalf of the rule manager.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `nft <args...>` and returns its result, whatever the exit code.
    async fn run(&self, args: &[String], cancel: &CancellationToken)
        -> PortMapResult<ExecResult>;

    /// Renders the full command line for `args`, used in error messages.
    fn command_line(&self, args: &[String]) -> String {
        shell::display_command(shell::NFT_CMD, args)
    }

    /// Runs `nft <args...>` and turns a non-zero exit into
    /// [`PortMapError::CommandFailed`]. Returns the combined output.
    async fn run_or_fail(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> PortMapResult<String> {
        let result = self.run(args, cancel).await?;
        if result.success() {
            Ok(result.combined_output())
        } else {
            Err(PortMapError::CommandFailed {
                command: self.command_line(args),
                exit_code: result.exit_code,
                output: result.combined_output(),
            })
        }
    }
}

/// Runs nft through `nsenter` in a target network namespace.
#[derive(Debug, Clone)]
pub struct NsenterRunner {
    target: NamespaceTarget,
    timeout: Duration,
}

impl NsenterRunner {
    /// Creates a runner for the given namespace with the default timeout.
    pub fn new(target: NamespaceTarget) -> Self {
        Self {
            target,
            timeout: shell::DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Overrides the per-command timeout (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the per-command timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the namespace commands run in.
    pub fn target(&self) -> NamespaceTarget {
        self.target
    }

    fn full_args(&self, args: &[String]) -> Vec<String> {
        let mut full = self.target.nsenter_prefix();
        full.extend(args.iter().cloned());
        full
    }
}

impl Default for NsenterRunner {
    fn default() -> Self {
        Self::new(NamespaceTarget::host())
    }
}

#[async_trait]
impl CommandRunner for NsenterRunner {
    async fn run(
        &self,
        args: &[String],
        cancel: &CancellationToken,
    ) -> PortMapResult<ExecResult> {
        shell::exec(shell::NSENTER_CMD, &self.full_args(args), self.timeout, cancel).await
    }

    fn command_line(&self, args: &[String]) -> String {
        shell::display_command(shell::NSENTER_CMD, &self.full_args(args))
    }
}
