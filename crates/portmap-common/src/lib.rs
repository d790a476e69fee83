//! Common infrastructure for the host port mapping daemon.
//!
//! - [`shell`]: bounded, cancellable command execution from argument vectors
//! - [`runner`]: [`CommandRunner`] seam and the `nsenter`-based runner that
//!   drives `nft` inside the host's network namespace
//! - [`steps`]: ordered multi-step operations with fatal/best-effort policy
//! - [`error`]: error types shared by the portmap crates
//!
//! # Example
//!
//! ```ignore
//! use portmap_common::{CommandRunner, NamespaceTarget, NsenterRunner};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn nft_version() -> portmap_common::PortMapResult<String> {
//!     let runner = NsenterRunner::new(NamespaceTarget::host());
//!     runner
//!         .run_or_fail(&["--version".to_string()], &CancellationToken::new())
//!         .await
//! }
//! ```

pub mod error;
pub mod runner;
pub mod shell;
pub mod steps;

pub use error::{PortMapError, PortMapResult};
pub use runner::{CommandRunner, NamespaceTarget, NsenterRunner};
pub use shell::ExecResult;
pub use steps::{StepPlan, StepPolicy, StepReport, StepWarning};

// Re-exported so callers don't need a direct tokio-util dependency.
pub use tokio_util::sync::CancellationToken;
