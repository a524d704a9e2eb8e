//! Error types for the sync server.

use filesync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid request format.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Credentials were refused.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Bearer token missing, invalid or expired.
    #[error("not authorized: {0}")]
    NotAuthorized(String),

    /// The addressed entry or endpoint does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::NotAuthorized(_) => 401,
            ServerError::AccessDenied(_) => 403,
            ServerError::NotFound(_) => 404,
            ServerError::Config(_) | ServerError::Internal(_) => 500,
            ServerError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => 404,
            ServerError::Io(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

impl From<ProtocolError> for ServerError {
    fn from(err: ProtocolError) -> Self {
        ServerError::InvalidRequest(err.to_string())
    }
}

impl From<walkdir::Error> for ServerError {
    fn from(err: walkdir::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}
