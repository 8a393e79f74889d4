//! # NetworkTables Codec
//!
//! Wire primitives for the NetworkTables v3 protocol.
//!
//! This crate provides the field-level encodings every v3 message is built
//! from:
//! - Unsigned LEB128 varints
//! - LEB128-prefixed UTF-8 strings and byte blobs
//! - Big-endian `u8`/`u16`/`u32` fields and IEEE-754 doubles
//! - One-byte array element counts
//!
//! Message layouts live in `ntables_protocol`; this crate knows nothing
//! about message or entry types.
//!
//! ## Usage
//!
//! ```
//! use ntables_codec::{to_unsigned_leb128, WireDecoder, WireEncoder};
//!
//! assert_eq!(to_unsigned_leb128(624485), vec![0xE5, 0x8E, 0x26]);
//!
//! let mut encoder = WireEncoder::new();
//! encoder.put_u16(0x1234);
//! encoder.put_string("hello");
//! let bytes = encoder.into_bytes();
//!
//! let mut decoder = WireDecoder::new(&bytes);
//! assert_eq!(decoder.read_u16().unwrap(), 0x1234);
//! assert_eq!(decoder.read_string().unwrap(), "hello");
//! assert!(decoder.is_empty());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod leb128;

pub use decoder::{decode_leb128_string, WireDecoder, MAX_BLOB_LENGTH};
pub use encoder::{encode_leb128_string, WireEncoder, MAX_ARRAY_LEN};
pub use error::{CodecError, CodecResult};
pub use leb128::{
    read_unsigned_leb128, to_unsigned_leb128, unsigned_leb128_len, write_unsigned_leb128,
    MAX_LEB128_LEN,
};
