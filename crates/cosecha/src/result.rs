//! Result and error types for Cosecha.

use thiserror::Error;

/// Result type for Cosecha operations
pub type CosechaResult<T> = Result<T, CosechaError>;

/// Errors that can occur in Cosecha
#[derive(Debug, Error)]
pub enum CosechaError {
    /// No lookup strategy resolved the target, or no qualifying grid existed
    #[error("{target} not found (tried: {})", attempts.join("; "))]
    NotFound {
        /// Human-readable target label
        target: String,
        /// One entry per attempted strategy, with its failure reason
        attempts: Vec<String>,
    },

    /// A wait exceeded its budget
    #[error("Timed out after {ms}ms waiting for {waited_for}")]
    TimedOut {
        /// Description of the awaited condition
        waited_for: String,
        /// Budget in milliseconds
        ms: u64,
    },

    /// The run-wide deadline expired before the wait could finish
    #[error("Run deadline exceeded while waiting for {waited_for}")]
    DeadlineExceeded {
        /// Description of the awaited condition
        waited_for: String,
    },

    /// A job failed on every attempt
    #[error("{job}: failed after {attempts} attempt(s). Last error: {last}")]
    Exhausted {
        /// Job name
        job: String,
        /// Number of attempts made
        attempts: u32,
        /// Error from the final attempt
        #[source]
        last: Box<CosechaError>,
    },

    /// Browser launch error
    #[error("Failed to launch browser: {message}")]
    BrowserLaunch {
        /// Error message
        message: String,
    },

    /// Navigation error
    #[error("Navigation to {url} failed: {message}")]
    Navigation {
        /// URL that failed
        url: String,
        /// Error message
        message: String,
    },

    /// Page interaction error
    #[error("Page error: {message}")]
    Page {
        /// Error message
        message: String,
    },

    /// Script evaluation error
    #[error("Script evaluation failed: {message}")]
    Script {
        /// Error message
        message: String,
    },

    /// Markup or workbook could not be parsed
    #[error("Parse error: {message}")]
    Parse {
        /// Error message
        message: String,
    },

    /// Post-download cleanup failed
    #[error("Normalization of {path} failed: {message}")]
    Normalization {
        /// Artifact path
        path: String,
        /// Error message
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CosechaError {
    /// Create a not-found error
    #[must_use]
    pub fn not_found(target: impl Into<String>, attempts: Vec<String>) -> Self {
        Self::NotFound {
            target: target.into(),
            attempts,
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timed_out(waited_for: impl Into<String>, timeout: std::time::Duration) -> Self {
        Self::TimedOut {
            waited_for: waited_for.into(),
            ms: timeout.as_millis() as u64,
        }
    }

    /// Create a page error
    #[must_use]
    pub fn page(message: impl Into<String>) -> Self {
        Self::Page {
            message: message.into(),
        }
    }

    /// Create a script error
    #[must_use]
    pub fn script(message: impl Into<String>) -> Self {
        Self::Script {
            message: message.into(),
        }
    }

    /// Create a parse error
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether this is a `NotFound`
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether this is a `TimedOut`
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Whether this is an `Exhausted`
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Whether the run-wide deadline tripped
    #[must_use]
    pub const fn is_deadline(&self) -> bool {
        matches!(self, Self::DeadlineExceeded { .. })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::error::Error as _;
    use std::time::Duration;

    #[test]
    fn test_not_found_lists_attempts() {
        let err = CosechaError::not_found(
            "Generar",
            vec!["role=button: no match".into(), "text: hidden".into()],
        );
        let msg = err.to_string();
        assert!(msg.contains("Generar"));
        assert!(msg.contains("role=button: no match; text: hidden"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_timed_out_reports_millis() {
        let err = CosechaError::timed_out("table rows", Duration::from_secs(2));
        assert_eq!(
            err.to_string(),
            "Timed out after 2000ms waiting for table rows"
        );
        assert!(err.is_timed_out());
    }

    #[test]
    fn test_exhausted_carries_last_error() {
        let err = CosechaError::Exhausted {
            job: "KPI".into(),
            attempts: 3,
            last: Box::new(CosechaError::page("boom")),
        };
        assert!(err.is_exhausted());
        assert!(err.to_string().contains("3 attempt(s)"));
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "Page error: boom");
    }

    #[test]
    fn test_io_error_from() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: CosechaError = io_err.into();
        assert!(err.to_string().contains("I/O"));
    }
}
