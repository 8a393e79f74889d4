//! Error types for the client.

use ntables_codec::CodecError;
use ntables_core::CoreError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The server does not speak our protocol version.
    #[error("server only supports protocol {major}.{minor}")]
    ProtocolUnsupported {
        /// Server's major version.
        major: u8,
        /// Server's minor version.
        minor: u8,
    },

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Entry or endpoint error.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The client was shut down while waiting.
    #[error("client shut down")]
    Cancelled,
}

impl ClientError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { retryable, .. } => *retryable,
            ClientError::NotConnected => true,
            _ => false,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => ClientError::NotConnected,
            other => ClientError::transport_retryable(other.to_string()),
        }
    }
}

/// Errors from [`ResilientSocket`](crate::ResilientSocket) writes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No session is up.
    #[error("socket not connected")]
    NotConnected,

    /// The session ended before the write completed.
    #[error("session closed before write completed")]
    SessionClosed,

    /// The OS rejected the write.
    #[error("write failed: {message}")]
    Io {
        /// Error message.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ClientError::transport_retryable("connection reset").is_retryable());
        assert!(ClientError::NotConnected.is_retryable());
        assert!(!ClientError::ProtocolUnsupported { major: 2, minor: 0 }.is_retryable());
        assert!(!ClientError::Cancelled.is_retryable());
    }

    #[test]
    fn transport_conversion() {
        assert!(matches!(
            ClientError::from(TransportError::NotConnected),
            ClientError::NotConnected
        ));
        let err = ClientError::from(TransportError::SessionClosed);
        assert!(err.is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ClientError::ProtocolUnsupported { major: 2, minor: 0 };
        assert_eq!(err.to_string(), "server only supports protocol 2.0");
    }
}
