//! Verification helpers for testing port mapping operations
//!
//! Provides assertion helpers over recorded nft command lines

use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected a command containing '{expected}', got {actual:?}")]
    CommandMissing { expected: String, actual: Vec<String> },

    #[error("Unexpected command containing '{pattern}': '{command}'")]
    UnexpectedCommand { pattern: String, command: String },

    #[error("Expected {expected} commands matching '{pattern}', found {actual}")]
    CommandCountMismatch {
        pattern: String,
        expected: usize,
        actual: usize,
    },

    #[error("Expected '{first}' before '{second}' in {actual:?}")]
    OrderMismatch {
        first: String,
        second: String,
        actual: Vec<String>,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Command execution verifier
pub struct CommandVerifier {
    captured_commands: Vec<String>,
}

impl CommandVerifier {
    /// Create a new command verifier
    pub fn new(captured_commands: Vec<String>) -> Self {
        Self { captured_commands }
    }

    fn position(&self, pattern: &str) -> Option<usize> {
        self.captured_commands
            .iter()
            .position(|cmd| cmd.contains(pattern))
    }

    /// Verify that a command containing `expected` was executed
    pub fn assert_command_executed(&self, expected: &str) -> VerifyResult<()> {
        match self.position(expected) {
            Some(_) => Ok(()),
            None => Err(VerificationError::CommandMissing {
                expected: expected.to_string(),
                actual: self.captured_commands.clone(),
            }),
        }
    }

    /// Verify that no command containing `pattern` was executed
    pub fn assert_command_not_executed(&self, pattern: &str) -> VerifyResult<()> {
        match self.position(pattern) {
            Some(i) => Err(VerificationError::UnexpectedCommand {
                pattern: pattern.to_string(),
                command: self.captured_commands[i].clone(),
            }),
            None => Ok(()),
        }
    }

    /// Verify the number of commands containing `pattern`
    pub fn assert_matching_count(&self, pattern: &str, expected: usize) -> VerifyResult<()> {
        let actual = self
            .captured_commands
            .iter()
            .filter(|cmd| cmd.contains(pattern))
            .count();
        if actual != expected {
            Err(VerificationError::CommandCountMismatch {
                pattern: pattern.to_string(),
                expected,
                actual,
            })
        } else {
            Ok(())
        }
    }

    /// Verify the number of commands executed
    pub fn assert_command_count(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.captured_commands.len();
        if actual != expected {
            Err(VerificationError::CommandCountMismatch {
                pattern: "*".to_string(),
                expected,
                actual,
            })
        } else {
            Ok(())
        }
    }

    /// Verify that the first command containing `first` ran before the
    /// first command containing `second`
    pub fn assert_executed_before(&self, first: &str, second: &str) -> VerifyResult<()> {
        match (self.position(first), self.position(second)) {
            (Some(a), Some(b)) if a < b => Ok(()),
            _ => Err(VerificationError::OrderMismatch {
                first: first.to_string(),
                second: second.to_string(),
                actual: self.captured_commands.clone(),
            }),
        }
    }

    /// Get all captured commands
    pub fn captured_commands(&self) -> &[String] {
        &self.captured_commands
    }
}
