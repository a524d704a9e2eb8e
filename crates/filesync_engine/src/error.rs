//! Error types for the sync engine.

use filesync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Protocol error (invalid message format).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Credentials were refused at login.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The bearer token is missing, invalid or expired.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// Server rejected the request.
    #[error("server error ({status}): {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Local filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem watcher failure.
    #[error("watcher error: {0}")]
    Watcher(String),

    /// A path cannot be mapped into the synchronized tree.
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::NotAuthorized(_) => true,
            SyncError::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true if the local entry the operation referred to is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::InvalidPath { .. } => SyncError::InvalidPath(err.to_string()),
            other => SyncError::Protocol(other.to_string()),
        }
    }
}

impl From<notify::Error> for SyncError {
    fn from(err: notify::Error) -> Self {
        SyncError::Watcher(err.to_string())
    }
}

impl From<walkdir::Error> for SyncError {
    fn from(err: walkdir::Error) -> Self {
        let message = err.to_string();
        match err.into_io_error() {
            Some(io) => SyncError::Io(io),
            None => SyncError::Io(std::io::Error::other(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection lost").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::NotAuthorized("expired".into()).is_retryable());
        assert!(SyncError::ServerError {
            status: 503,
            message: "busy".into()
        }
        .is_retryable());
        assert!(!SyncError::ServerError {
            status: 404,
            message: "missing".into()
        }
        .is_retryable());
        assert!(!SyncError::NotConnected.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = SyncError::NotConnected;
        assert_eq!(err.to_string(), "not connected to server");

        let err = SyncError::ServerError {
            status: 500,
            message: "boom".into(),
        };
        assert_eq!(err.to_string(), "server error (500): boom");
    }

    #[test]
    fn protocol_path_errors_map_to_invalid_path() {
        let err: SyncError = filesync_protocol::normalize_relative_path("../x")
            .unwrap_err()
            .into();
        assert!(matches!(err, SyncError::InvalidPath(_)));
    }

    #[test]
    fn not_found_detection() {
        let err = SyncError::Io(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(err.is_not_found());
        assert!(!SyncError::NotConnected.is_not_found());
    }
}
