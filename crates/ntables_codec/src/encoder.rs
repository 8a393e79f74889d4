//! Wire encoder.

use crate::error::{CodecError, CodecResult};
use crate::leb128::write_unsigned_leb128;
use bytes::{BufMut, Bytes, BytesMut};

/// Largest element count an array header can carry.
pub const MAX_ARRAY_LEN: usize = u8::MAX as usize;

/// Encode `s` as a LEB128-prefixed UTF-8 string.
pub fn encode_leb128_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 2);
    write_unsigned_leb128(&mut out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
    out
}

/// An append-only encoder for NetworkTables wire fields.
///
/// Multi-byte integers and doubles are written big-endian.
pub struct WireEncoder {
    buffer: BytesMut,
}

impl WireEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::new(),
        }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Write a single byte.
    pub fn put_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    /// Write a big-endian `u16`.
    pub fn put_u16(&mut self, value: u16) {
        self.buffer.put_u16(value);
    }

    /// Write a big-endian `u32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buffer.put_u32(value);
    }

    /// Write an IEEE-754 double, big-endian.
    pub fn put_f64(&mut self, value: f64) {
        self.buffer.put_f64(value);
    }

    /// Write a boolean as `0` or `1`.
    pub fn put_bool(&mut self, value: bool) {
        self.buffer.put_u8(u8::from(value));
    }

    /// Write an unsigned LEB128 varint.
    pub fn put_unsigned_leb128(&mut self, value: u64) {
        write_unsigned_leb128(&mut self.buffer, value);
    }

    /// Write a LEB128-prefixed UTF-8 string.
    pub fn put_string(&mut self, value: &str) {
        self.put_unsigned_leb128(value.len() as u64);
        self.buffer.put_slice(value.as_bytes());
    }

    /// Write a LEB128-prefixed byte blob.
    pub fn put_blob(&mut self, value: &[u8]) {
        self.put_unsigned_leb128(value.len() as u64);
        self.buffer.put_slice(value);
    }

    /// Write raw bytes with no prefix.
    pub fn put_slice(&mut self, value: &[u8]) {
        self.buffer.put_slice(value);
    }

    /// Write the one-byte element count of an array.
    ///
    /// # Errors
    ///
    /// Returns `ArrayTooLong` if `len` does not fit in one byte.
    pub fn put_array_len(&mut self, len: usize) -> CodecResult<()> {
        let count = u8::try_from(len).map_err(|_| CodecError::ArrayTooLong { len })?;
        self.buffer.put_u8(count);
        Ok(())
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Bytes {
        self.buffer.freeze()
    }
}

impl Default for WireEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_width_fields_are_big_endian() {
        let mut enc = WireEncoder::new();
        enc.put_u8(0x10);
        enc.put_u16(0x1234);
        enc.put_u32(0xD06C_B27A);
        assert_eq!(
            enc.as_bytes(),
            &[0x10, 0x12, 0x34, 0xD0, 0x6C, 0xB2, 0x7A]
        );
    }

    #[test]
    fn double_layout() {
        let mut enc = WireEncoder::new();
        enc.put_f64(1.0);
        assert_eq!(enc.as_bytes(), &[0x3f, 0xf0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn bools() {
        let mut enc = WireEncoder::new();
        enc.put_bool(true);
        enc.put_bool(false);
        assert_eq!(enc.as_bytes(), &[1, 0]);
    }

    #[test]
    fn strings_are_length_prefixed() {
        let mut enc = WireEncoder::new();
        enc.put_string("abc");
        enc.put_string("");
        assert_eq!(enc.as_bytes(), &[3, b'a', b'b', b'c', 0]);
        assert_eq!(encode_leb128_string("abc"), vec![3, b'a', b'b', b'c']);
    }

    #[test]
    fn string_length_counts_utf8_bytes() {
        let encoded = encode_leb128_string("é");
        assert_eq!(encoded, vec![2, 0xc3, 0xa9]);
    }

    #[test]
    fn long_blob_uses_multibyte_prefix() {
        let blob = vec![7u8; 200];
        let mut enc = WireEncoder::new();
        enc.put_blob(&blob);
        assert_eq!(&enc.as_bytes()[..2], &[0xc8, 0x01]);
        assert_eq!(enc.len(), 202);
    }

    #[test]
    fn array_len_limit() {
        let mut enc = WireEncoder::new();
        assert!(enc.put_array_len(MAX_ARRAY_LEN).is_ok());
        assert_eq!(
            enc.put_array_len(256),
            Err(CodecError::ArrayTooLong { len: 256 })
        );
        assert_eq!(enc.as_bytes(), &[0xff]);
    }
}
