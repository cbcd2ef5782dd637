//! Error types for the CLI

use thiserror::Error;

/// Result type for CLI operations
pub type CliResult<T> = Result<T, CliError>;

/// Errors that can occur in the CLI
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// A report run did not complete
    #[error("Report run failed: {message}")]
    Report {
        /// Error message
        message: String,
    },

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Cosecha library error
    #[error("Cosecha error: {0}")]
    Cosecha(#[from] cosecha::CosechaError),

    /// Notification delivery error
    #[error("Notification failed: {message}")]
    Notification {
        /// Error message
        message: String,
    },
}

impl CliError {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a report run error
    #[must_use]
    pub fn report(message: impl Into<String>) -> Self {
        Self::Report {
            message: message.into(),
        }
    }

    /// Create a notification error
    #[must_use]
    pub fn notification(message: impl Into<String>) -> Self {
        Self::Notification {
            message: message.into(),
        }
    }
}

impl From<serde_yaml_ng::Error> for CliError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for CliError {
    fn from(err: reqwest::Error) -> Self {
        Self::notification(err.to_string())
    }
}
