//! Error types for port mapping operations.
//!
//! This module defines the error types used throughout the portmap crates.
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for port mapping operations.
pub type PortMapResult<T> = Result<T, PortMapError>;

/// Errors that can occur while driving the host ruleset.
#[derive(Debug, Error)]
pub enum PortMapError {
    /// Failed to spawn the control command.
    #[error("Failed to execute command '{command}': {source}")]
    Spawn {
        /// The command that failed to start.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Control command returned non-zero exit code.
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code (-1 if terminated by a signal).
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Control command exceeded the execution bound and was killed.
    #[error("Command timed out after {timeout:?}: '{command}'")]
    Timeout {
        /// The command that was killed.
        command: String,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// Caller gave up before the command finished.
    #[error("Command cancelled: '{command}'")]
    Cancelled {
        /// The command that was killed.
        command: String,
    },

    /// Chain creation or jump rule insertion failed.
    #[error("Failed to initialize chain ({step}): {source}")]
    ChainInit {
        /// Which initialization step failed.
        step: &'static str,
        /// The command error.
        #[source]
        source: Box<PortMapError>,
    },

    /// Destination NAT rule could not be added.
    #[error("Failed to add DNAT rule: {source}")]
    RuleInstall {
        /// The command error.
        #[source]
        source: Box<PortMapError>,
    },

    /// Delete-by-handle failed.
    #[error("Failed to delete rule with handle {handle}: {source}")]
    RuleDelete {
        /// Handle of the rule that could not be removed.
        handle: u64,
        /// The command error.
        #[source]
        source: Box<PortMapError>,
    },

    /// Listing the dedicated chain failed.
    #[error("Failed to list port mappings: {source}")]
    ListFailed {
        /// The command error.
        #[source]
        source: Box<PortMapError>,
    },

    /// A listing line matched but carried no usable handle.
    #[error("Could not extract rule handle from line: '{line}'")]
    HandleParse {
        /// The offending listing line.
        line: String,
    },

    /// The version probe failed.
    #[error("nft is not available: {source}")]
    NftUnavailable {
        /// The command error.
        #[source]
        source: Box<PortMapError>,
    },

    /// Request argument failed validation.
    #[error("Invalid argument {field}: {message}")]
    InvalidArgument {
        /// The argument name.
        field: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl PortMapError {
    /// Wraps a command error as a chain initialization failure.
    pub fn chain_init(step: &'static str, source: PortMapError) -> Self {
        Self::ChainInit {
            step,
            source: Box::new(source),
        }
    }

    /// Wraps a command error as a DNAT install failure.
    pub fn rule_install(source: PortMapError) -> Self {
        Self::RuleInstall {
            source: Box::new(source),
        }
    }

    /// Wraps a command error as a delete-by-handle failure.
    pub fn rule_delete(handle: u64, source: PortMapError) -> Self {
        Self::RuleDelete {
            handle,
            source: Box::new(source),
        }
    }

    /// Wraps a command error as a listing failure.
    pub fn list_failed(source: PortMapError) -> Self {
        Self::ListFailed {
            source: Box::new(source),
        }
    }

    /// Wraps a command error as a failed version probe.
    pub fn nft_unavailable(source: PortMapError) -> Self {
        Self::NftUnavailable {
            source: Box::new(source),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// The command error a step error wraps, if any.
    pub fn step_source(&self) -> Option<&PortMapError> {
        match self {
            PortMapError::ChainInit { source, .. }
            | PortMapError::RuleInstall { source }
            | PortMapError::RuleDelete { source, .. }
            | PortMapError::ListFailed { source }
            | PortMapError::NftUnavailable { source } => Some(source.as_ref()),
            _ => None,
        }
    }

    /// Returns true if this error came from running a control command,
    /// directly or wrapped in a step error (as opposed to validation or
    /// parsing).
    pub fn is_command_error(&self) -> bool {
        match self {
            PortMapError::Spawn { .. }
            | PortMapError::CommandFailed { .. }
            | PortMapError::Timeout { .. }
            | PortMapError::Cancelled { .. } => true,
            _ => self.step_source().is_some_and(PortMapError::is_command_error),
        }
    }

    /// Returns true if the caller gave up on the operation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PortMapError::Cancelled { .. })
    }
}
