//! Verification helpers for device command streams

use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected command containing '{expected}', got {actual:?}")]
    CommandNotExecuted { expected: String, actual: Vec<String> },

    #[error("Command containing '{unexpected}' was executed")]
    CommandExecuted { unexpected: String },

    #[error("Expected {expected} commands, found {actual}")]
    CommandCountMismatch { expected: usize, actual: usize },

    #[error("Expected '{first}' before '{second}'")]
    OrderMismatch { first: String, second: String },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Command execution verifier
pub struct CommandVerifier {
    captured_commands: Vec<String>,
}

impl CommandVerifier {
    pub fn new(captured_commands: Vec<String>) -> Self {
        Self { captured_commands }
    }

    fn position(&self, needle: &str) -> Option<usize> {
        self.captured_commands
            .iter()
            .position(|cmd| cmd.contains(needle))
    }

    /// Verify that a command containing `expected` was executed
    pub fn assert_command_executed(&self, expected: &str) -> VerifyResult<()> {
        match self.position(expected) {
            Some(_) => Ok(()),
            None => Err(VerificationError::CommandNotExecuted {
                expected: expected.to_string(),
                actual: self.captured_commands.clone(),
            }),
        }
    }

    /// Verify that no command containing `unexpected` was executed
    pub fn assert_command_not_executed(&self, unexpected: &str) -> VerifyResult<()> {
        match self.position(unexpected) {
            Some(_) => Err(VerificationError::CommandExecuted {
                unexpected: unexpected.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Verify the number of commands executed
    pub fn assert_command_count(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.captured_commands.len();
        if actual != expected {
            return Err(VerificationError::CommandCountMismatch { expected, actual });
        }
        Ok(())
    }

    /// Verify how many commands contain `needle`
    pub fn assert_matching_count(&self, needle: &str, expected: usize) -> VerifyResult<()> {
        let actual = self
            .captured_commands
            .iter()
            .filter(|cmd| cmd.contains(needle))
            .count();
        if actual != expected {
            return Err(VerificationError::CommandCountMismatch { expected, actual });
        }
        Ok(())
    }

    /// Verify that the first command containing `first` precedes the first
    /// containing `second`
    pub fn assert_executed_before(&self, first: &str, second: &str) -> VerifyResult<()> {
        match (self.position(first), self.position(second)) {
            (Some(a), Some(b)) if a < b => Ok(()),
            _ => Err(VerificationError::OrderMismatch {
                first: first.to_string(),
                second: second.to_string(),
            }),
        }
    }

    pub fn captured_commands(&self) -> &[String] {
        &self.captured_commands
    }
}
