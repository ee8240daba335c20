//! Error types for the Vulcan service runtime

use std::io;

use thiserror::Error;

/// Result type alias for startup and server operations
pub type Result<T> = std::result::Result<T, Error>;

/// Service-level errors (configuration and binding).
///
/// Request-path failures use [`AuthError`](crate::auth::AuthError) instead.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<crate::auth::AuthError> for Error {
    fn from(e: crate::auth::AuthError) -> Self {
        Self::Internal(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = Error::Config("missing providers".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing providers");
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = io::Error::new(io::ErrorKind::AddrInUse, "port taken").into();
        assert!(matches!(err, Error::Io(_)));
    }
}
