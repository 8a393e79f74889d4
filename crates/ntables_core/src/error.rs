//! Error types for participant operations.

use ntables_protocol::EntryType;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors returned by typed entry accessors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// No entry with this name exists.
    #[error("entry not found: {name}")]
    EntryNotFound {
        /// Name that was looked up.
        name: String,
    },

    /// The entry exists but holds a different type.
    #[error("entry {name} is {actual}, not {expected}")]
    TypeMismatch {
        /// Name that was looked up.
        name: String,
        /// Type the caller asked for.
        expected: EntryType,
        /// Type the entry actually has.
        actual: EntryType,
    },

    /// Every entry id is in use.
    #[error("no free entry id for {name}")]
    IdsExhausted {
        /// Name that could not be assigned.
        name: String,
    },

    /// An address could not be parsed as an endpoint.
    #[error("invalid endpoint address: {address}")]
    InvalidEndpoint {
        /// The address as given.
        address: String,
    },
}

impl CoreError {
    /// Create an entry not found error.
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::EntryNotFound { name: name.into() }
    }
}
