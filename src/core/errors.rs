//! Error taxonomy shared by every step

use crate::core::state::Phase;
use thiserror::Error;

/// Errors raised by steps and pipelines
///
/// The kind tells the caller who has to act: `Config` is operator-fixable
/// input, `Validation` is a broken artifact, `Build`/`Test` are failures of
/// the actual work.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Error when checking config option '{option}': {message}")]
    Config { option: String, message: String },

    #[error("Validation error in {origin}: {message}")]
    Validation { origin: String, message: String },

    #[error("Build error in {origin}: {message}")]
    Build { origin: String, message: String },

    #[error("Test error in {origin}: {message}")]
    Test { origin: String, message: String },

    #[error("{phase} failed for: {}", .failed.join(", "))]
    StepsFailed { phase: Phase, failed: Vec<String> },
}

impl Error {
    pub fn config(option: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            option: option.into(),
            message: message.into(),
        }
    }

    pub fn validation(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn build(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Build {
            origin: origin.into(),
            message: message.into(),
        }
    }

    pub fn test(origin: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Test {
            origin: origin.into(),
            message: message.into(),
        }
    }

    /// Human readable message without the kind prefix
    pub fn message(&self) -> String {
        match self {
            Error::Config { message, .. }
            | Error::Validation { message, .. }
            | Error::Build { message, .. }
            | Error::Test { message, .. } => message.clone(),
            Error::StepsFailed { .. } => self.to_string(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Error::Config { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Converts collaborator errors into step errors at component boundaries
pub trait ErrorContext<T> {
    fn validation_err(self, origin: &str) -> Result<T>;
    fn build_err(self, origin: &str) -> Result<T>;
    fn test_err(self, origin: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ErrorContext<T> for std::result::Result<T, E> {
    fn validation_err(self, origin: &str) -> Result<T> {
        self.map_err(|e| Error::validation(origin, e.to_string()))
    }

    fn build_err(self, origin: &str) -> Result<T> {
        self.map_err(|e| Error::build(origin, e.to_string()))
    }

    fn test_err(self, origin: &str) -> Result<T> {
        self.map_err(|e| Error::test(origin, e.to_string()))
    }
}
