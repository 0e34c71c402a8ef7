use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("{}", validation_message(.constraint, .message))]
    ValidationFailed {
        /// Name of the violated constraint, when a named constraint failed
        constraint: Option<String>,
        message: String,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Internal error: {0}")]
    Internal(String),
}

fn validation_message(constraint: &Option<String>, message: &str) -> String {
    match constraint {
        Some(name) => format!("Validation failed: constraint {} violated: {}", name, message),
        None => format!("Validation failed: {}", message),
    }
}

impl Error {
    /// Validation failure attributed to a named constraint
    pub fn constraint_violation(constraint: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ValidationFailed {
            constraint: Some(constraint.into()),
            message: message.into(),
        }
    }

    /// Validation failure from the record validator (no named constraint)
    pub fn validation(message: impl Into<String>) -> Self {
        Error::ValidationFailed {
            constraint: None,
            message: message.into(),
        }
    }

    /// Returns a stable error code for this error variant.
    /// These codes are stable and can be used by callers for error classification.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Io(_) => "IO_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::InvalidState(_) => "INVALID_STATE",
            Error::ValidationFailed { .. } => "VALIDATION_FAILED",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::Corruption(_) => "CORRUPTION",
            Error::Cancelled => "CANCELLED",
            Error::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns true if retrying the whole transaction may succeed.
    ///
    /// The engine never retries on its own; this only classifies errors for
    /// callers that implement a retry loop at the transaction boundary.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Io(_) => true,
            Error::Conflict(_) => true,
            Error::Cancelled => true,
            Error::DeadlineExceeded => true,

            Error::Serialization(_) => false,
            Error::NotFound(_) => false,
            Error::InvalidState(_) => false,
            Error::ValidationFailed { .. } => false,
            Error::InvalidArgument(_) => false,
            Error::Corruption(_) => false,
            Error::Internal(_) => false,
        }
    }

    /// Name of the violated constraint, if this is a constraint violation
    pub fn violated_constraint(&self) -> Option<&str> {
        match self {
            Error::ValidationFailed { constraint, .. } => constraint.as_deref(),
            _ => None,
        }
    }

    /// Adds context to an error by wrapping it in an Internal error.
    ///
    /// Errors that callers branch on pass through unchanged; only
    /// serialization, corruption, argument and internal errors are wrapped.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use lstone_core::Error;
    ///
    /// fn decode_snapshot() -> Result<(), Error> {
    ///     Err(Error::Corruption("checksum mismatch".into()))
    /// }
    ///
    /// fn checkpoint() -> Result<(), Error> {
    ///     decode_snapshot().map_err(|e| e.with_context("failed to load checkpoint"))
    /// }
    /// ```
    pub fn with_context(self, context: &str) -> Error {
        match self {
            Error::Io(_)
            | Error::NotFound(_)
            | Error::Conflict(_)
            | Error::InvalidState(_)
            | Error::ValidationFailed { .. }
            | Error::Cancelled
            | Error::DeadlineExceeded => self,
            other => Error::Internal(format!("{}: {}", context, other)),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(Error::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(Error::Conflict("x".into()).code(), "CONFLICT");
        assert_eq!(Error::InvalidState("x".into()).code(), "INVALID_STATE");
        assert_eq!(Error::validation("x").code(), "VALIDATION_FAILED");
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn test_constraint_violation_names_constraint() {
        let err = Error::constraint_violation("positive_duration", "duration out of range");
        assert_eq!(err.violated_constraint(), Some("positive_duration"));
        assert!(err.to_string().contains("positive_duration"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_with_context_keeps_typed_errors() {
        let err = Error::NotFound("version 9".into()).with_context("time travel");
        assert!(matches!(err, Error::NotFound(_)));

        let io = Error::Io(io::Error::new(io::ErrorKind::Other, "disk full"));
        assert!(matches!(io.with_context("commit"), Error::Io(_)));

        let corrupt = Error::Corruption("bad checksum".into());
        let wrapped = corrupt.with_context("load version 3");
        assert!(matches!(wrapped, Error::Internal(ref m) if m.starts_with("load version 3: ")));
    }
}
