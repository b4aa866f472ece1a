use std::fmt;
use thiserror::Error;

/// A single problem found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Unified error type for request-counter.
#[derive(Error, Debug)]
pub enum RequestCounterError {
    /// Backing storage failed; `op` names the step (open, resize, map, flush, close)
    #[error("storage {op} failed: {source}")]
    Storage {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// Word index outside of the counter array
    #[error("index {index} out of bounds for array of {len} words")]
    OutOfBounds { index: usize, len: usize },

    /// The counter is shutting down or already shut down
    #[error("request counter is closed")]
    Closed,

    /// No route for the requested path
    #[error("not found")]
    NotFound,

    /// Background tasks were already launched
    #[error("request counter already started")]
    AlreadyStarted,

    /// Invalid argument (bad env value, bad CLI value)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Validation error with messages
    #[error("Validation error: {}", .0.iter().map(ToString::to_string).collect::<Vec<_>>().join("; "))]
    ValidationError(Vec<ValidationIssue>),

    /// Parse/serialization error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// I/O error outside of the counter storage
    #[error("I/O error: {0}")]
    IoError(String),
}

impl RequestCounterError {
    pub(crate) fn storage(op: &'static str, source: std::io::Error) -> Self {
        RequestCounterError::Storage { op, source }
    }

    /// HTTP status to report when this error reaches a client.
    pub fn status_code(&self) -> u16 {
        match self {
            RequestCounterError::Closed => 503,
            RequestCounterError::NotFound => 404,
            RequestCounterError::InvalidArgument(_)
            | RequestCounterError::ValidationError(_)
            | RequestCounterError::ParseError(_) => 400,
            RequestCounterError::Storage { .. }
            | RequestCounterError::OutOfBounds { .. }
            | RequestCounterError::AlreadyStarted
            | RequestCounterError::IoError(_) => 500,
        }
    }

    /// Check if this error is transient and the caller may retry
    pub fn is_transient(&self) -> bool {
        matches!(self, RequestCounterError::Closed)
    }
}

impl From<std::io::Error> for RequestCounterError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::InvalidInput => RequestCounterError::InvalidArgument(err.to_string()),
            _ => RequestCounterError::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RequestCounterError {
    fn from(err: serde_json::Error) -> Self {
        RequestCounterError::ParseError(err.to_string())
    }
}

impl From<toml::de::Error> for RequestCounterError {
    fn from(err: toml::de::Error) -> Self {
        RequestCounterError::ParseError(err.to_string())
    }
}

/// Result type alias for operations that can fail with RequestCounterError.
pub type RequestCounterResult<T> = Result<T, RequestCounterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RequestCounterError::Closed.status_code(), 503);
        assert_eq!(RequestCounterError::NotFound.status_code(), 404);
        assert_eq!(
            RequestCounterError::InvalidArgument("x".to_string()).status_code(),
            400
        );
        assert_eq!(
            RequestCounterError::storage("map", std::io::Error::other("boom")).status_code(),
            500
        );
        assert_eq!(
            RequestCounterError::OutOfBounds { index: 9, len: 7 }.status_code(),
            500
        );
    }

    #[test]
    fn test_is_transient() {
        assert!(RequestCounterError::Closed.is_transient());
        assert!(!RequestCounterError::AlreadyStarted.is_transient());
        assert!(!RequestCounterError::storage("flush", std::io::Error::other("eio")).is_transient());
    }

    #[test]
    fn test_display_formatting() {
        let err = RequestCounterError::storage(
            "open",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(format!("{}", err), "storage open failed: denied");

        let err = RequestCounterError::ValidationError(vec![
            ValidationIssue {
                field: "counter.interval-count".to_string(),
                message: "must be greater than zero".to_string(),
            },
            ValidationIssue {
                field: "server.port".to_string(),
                message: "must not be zero".to_string(),
            },
        ]);
        assert_eq!(
            format!("{}", err),
            "Validation error: counter.interval-count: must be greater than zero; server.port: must not be zero"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let err: RequestCounterError =
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad").into();
        assert!(matches!(err, RequestCounterError::InvalidArgument(_)));

        let err: RequestCounterError = std::io::Error::other("eio").into();
        assert!(matches!(err, RequestCounterError::IoError(_)));
    }
}
