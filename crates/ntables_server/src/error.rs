//! Error types for the server.

use ntables_codec::CodecError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// I/O error, typically from binding the listener.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A peer sent bytes that do not decode.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// `start` was called on a running server.
    #[error("server already running")]
    AlreadyRunning,

    /// The operation needs a running server.
    #[error("server not running")]
    NotRunning,
}

impl ServerError {
    /// Returns true if the error was caused by a peer or by the caller.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::Codec(_) | ServerError::AlreadyRunning | ServerError::NotRunning
        )
    }

    /// Returns true if the error came from the host.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::AlreadyRunning.is_client_error());
        assert!(ServerError::from(CodecError::UnknownMessageType { found: 0x7F }).is_client_error());
        let io = ServerError::from(std::io::Error::new(std::io::ErrorKind::AddrInUse, "busy"));
        assert!(io.is_server_error());
        assert!(!io.is_client_error());
    }

    #[test]
    fn error_display() {
        assert_eq!(ServerError::NotRunning.to_string(), "server not running");
    }
}
