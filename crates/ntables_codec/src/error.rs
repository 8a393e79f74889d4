//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur during encoding or decoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Fewer bytes remain than the field being decoded requires.
    #[error("buffer too short: needed {needed} bytes, {available} available")]
    BufferTooShort {
        /// Bytes required from the current offset.
        needed: usize,
        /// Bytes actually remaining from the current offset.
        available: usize,
    },

    /// The leading type byte is not the one the decoder expects.
    #[error("wrong message type: expected 0x{expected:02x}, found 0x{found:02x}")]
    WrongMessageType {
        /// Type byte the decoder was called for.
        expected: u8,
        /// Type byte found in the buffer.
        found: u8,
    },

    /// The type byte does not name any known message.
    #[error("unknown message type 0x{found:02x}")]
    UnknownMessageType {
        /// Type byte found in the buffer.
        found: u8,
    },

    /// An embedded entry type byte is not a recognized entry type code.
    #[error("invalid entry type 0x{found:02x}")]
    InvalidEntryType {
        /// Type byte found in the buffer.
        found: u8,
    },

    /// A value does not match its declared type, or a constant is wrong.
    #[error("invalid entry value: {message}")]
    InvalidEntryValue {
        /// Description of the problem.
        message: String,
    },

    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// A LEB128 varint does not fit in 64 bits.
    #[error("LEB128 value overflows 64 bits")]
    VarintOverflow,

    /// An array has more elements than the one-byte count can carry.
    #[error("array of {len} elements exceeds the 255 element limit")]
    ArrayTooLong {
        /// Number of elements in the array.
        len: usize,
    },

    /// A declared length is larger than the decoder accepts.
    #[error("declared length {claimed} exceeds limit of {max_allowed}")]
    SizeLimitExceeded {
        /// Length claimed by the input.
        claimed: u64,
        /// Maximum accepted length.
        max_allowed: u64,
    },
}

impl CodecError {
    /// Create an invalid entry value error.
    pub fn invalid_entry_value(message: impl Into<String>) -> Self {
        Self::InvalidEntryValue {
            message: message.into(),
        }
    }

    /// Create a buffer-too-short error for a read at `offset` of `needed` bytes.
    pub fn too_short(buf_len: usize, offset: usize, needed: usize) -> Self {
        Self::BufferTooShort {
            needed,
            available: buf_len.saturating_sub(offset),
        }
    }

    /// Returns true if more input could turn this failure into a success.
    ///
    /// Stream framing treats these as "wait for more bytes"; every other
    /// kind means the stream is malformed.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, CodecError::BufferTooShort { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_classification() {
        assert!(CodecError::too_short(3, 1, 4).is_incomplete());
        assert!(!CodecError::InvalidUtf8.is_incomplete());
        assert!(!CodecError::UnknownMessageType { found: 0x7f }.is_incomplete());
    }

    #[test]
    fn too_short_reports_remaining() {
        assert_eq!(
            CodecError::too_short(5, 2, 8),
            CodecError::BufferTooShort {
                needed: 8,
                available: 3
            }
        );
        assert_eq!(
            CodecError::too_short(2, 4, 1),
            CodecError::BufferTooShort {
                needed: 1,
                available: 0
            }
        );
    }

    #[test]
    fn error_display() {
        let err = CodecError::WrongMessageType {
            expected: 0x10,
            found: 0x11,
        };
        assert_eq!(
            err.to_string(),
            "wrong message type: expected 0x10, found 0x11"
        );
    }
}
