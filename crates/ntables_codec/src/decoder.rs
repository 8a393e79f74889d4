//! Wire decoder.

use crate::error::{CodecError, CodecResult};
use crate::leb128::read_unsigned_leb128;

/// Maximum accepted length of a string or blob.
/// This prevents a hostile length prefix from stalling a stream forever.
pub const MAX_BLOB_LENGTH: u64 = 16 * 1024 * 1024;

/// Decode a LEB128-prefixed string starting at `offset`.
///
/// Returns the string and the offset of the first byte after it.
///
/// # Errors
///
/// `BufferTooShort` if fewer bytes remain than the prefix declares,
/// `InvalidUtf8` if the bytes are not UTF-8.
pub fn decode_leb128_string(buf: &[u8], offset: usize) -> CodecResult<(String, usize)> {
    let mut decoder = WireDecoder::at(buf, offset);
    let value = decoder.read_string()?;
    Ok((value, decoder.position()))
}

/// A cursor over a byte buffer that reads NetworkTables wire fields.
///
/// Every read checks the remaining length first; a failed read leaves the
/// position where it was.
pub struct WireDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireDecoder<'a> {
    /// Create a decoder positioned at the start of `data`.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Create a decoder positioned at `offset`.
    pub fn at(data: &'a [u8], offset: usize) -> Self {
        Self { data, pos: offset }
    }

    /// Offset of the next unread byte.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or(&[])
    }

    /// Fail with `BufferTooShort` unless `len` more bytes are available.
    pub fn require(&self, len: usize) -> CodecResult<()> {
        if self.remaining().len() < len {
            return Err(CodecError::too_short(self.data.len(), self.pos, len));
        }
        Ok(())
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> CodecResult<u8> {
        self.require(1)?;
        Ok(self.data[self.pos])
    }

    /// Read a single byte.
    #[inline]
    pub fn read_u8(&mut self) -> CodecResult<u8> {
        let byte = self.peek_u8()?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read `len` raw bytes.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        self.require(len)?;
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> CodecResult<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Read a big-endian `u16`.
    pub fn read_u16(&mut self) -> CodecResult<u16> {
        self.read_array().map(u16::from_be_bytes)
    }

    /// Read a big-endian `u32`.
    pub fn read_u32(&mut self) -> CodecResult<u32> {
        self.read_array().map(u32::from_be_bytes)
    }

    /// Read a big-endian IEEE-754 double.
    pub fn read_f64(&mut self) -> CodecResult<f64> {
        self.read_array().map(f64::from_be_bytes)
    }

    /// Read a boolean byte; only `1` is true.
    pub fn read_bool(&mut self) -> CodecResult<bool> {
        self.read_u8().map(|b| b == 1)
    }

    /// Read an unsigned LEB128 varint.
    pub fn read_unsigned_leb128(&mut self) -> CodecResult<u64> {
        let (value, next) = read_unsigned_leb128(self.data, self.pos)?;
        self.pos = next;
        Ok(value)
    }

    /// Read a LEB128-prefixed byte blob.
    pub fn read_blob(&mut self) -> CodecResult<&'a [u8]> {
        let start = self.pos;
        let result = self.read_length().and_then(|len| self.read_bytes(len));
        if result.is_err() {
            self.pos = start;
        }
        result
    }

    /// Read a LEB128-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> CodecResult<String> {
        let start = self.pos;
        let bytes = self.read_blob()?;
        match std::str::from_utf8(bytes) {
            Ok(text) => Ok(text.to_string()),
            Err(_) => {
                self.pos = start;
                Err(CodecError::InvalidUtf8)
            }
        }
    }

    fn read_length(&mut self) -> CodecResult<usize> {
        let len = self.read_unsigned_leb128()?;
        if len > MAX_BLOB_LENGTH {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_BLOB_LENGTH,
            });
        }
        usize::try_from(len).map_err(|_| CodecError::VarintOverflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::encode_leb128_string;

    #[test]
    fn read_fixed_fields() {
        let buf = [0x10, 0x12, 0x34, 0xD0, 0x6C, 0xB2, 0x7A];
        let mut dec = WireDecoder::new(&buf);
        assert_eq!(dec.read_u8().unwrap(), 0x10);
        assert_eq!(dec.read_u16().unwrap(), 0x1234);
        assert_eq!(dec.read_u32().unwrap(), 0xD06C_B27A);
        assert!(dec.is_empty());
    }

    #[test]
    fn read_double() {
        let buf = 3.5f64.to_be_bytes();
        let mut dec = WireDecoder::new(&buf);
        assert_eq!(dec.read_f64().unwrap(), 3.5);
    }

    #[test]
    fn read_bool_only_one_is_true() {
        let mut dec = WireDecoder::new(&[1, 0, 2]);
        assert!(dec.read_bool().unwrap());
        assert!(!dec.read_bool().unwrap());
        assert!(!dec.read_bool().unwrap());
    }

    #[test]
    fn string_roundtrip() {
        let encoded = encode_leb128_string("the quick brown fox");
        let (value, next) = decode_leb128_string(&encoded, 0).unwrap();
        assert_eq!(value, "the quick brown fox");
        assert_eq!(next, encoded.len());
    }

    #[test]
    fn string_shorter_than_declared() {
        let err = decode_leb128_string(&[5, b'a', b'b'], 0).unwrap_err();
        assert_eq!(
            err,
            CodecError::BufferTooShort {
                needed: 5,
                available: 2
            }
        );
    }

    #[test]
    fn failed_read_keeps_position() {
        let buf = [0x00, 4, b'a'];
        let mut dec = WireDecoder::new(&buf);
        dec.read_u8().unwrap();
        assert!(dec.read_string().is_err());
        assert_eq!(dec.position(), 1);
        assert!(dec.read_u32().is_err());
        assert_eq!(dec.position(), 1);
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert_eq!(
            decode_leb128_string(&[2, 0xff, 0xfe], 0),
            Err(CodecError::InvalidUtf8)
        );
    }

    #[test]
    fn oversized_length_rejected() {
        let mut buf = Vec::new();
        crate::leb128::write_unsigned_leb128(&mut buf, MAX_BLOB_LENGTH + 1);
        let mut dec = WireDecoder::new(&buf);
        assert!(matches!(
            dec.read_blob(),
            Err(CodecError::SizeLimitExceeded { .. })
        ));
    }

    #[test]
    fn peek_does_not_consume() {
        let mut dec = WireDecoder::at(&[9, 8, 7], 1);
        assert_eq!(dec.peek_u8().unwrap(), 8);
        assert_eq!(dec.read_u8().unwrap(), 8);
        assert_eq!(dec.remaining(), &[7]);
    }

    #[test]
    fn empty_input() {
        let mut dec = WireDecoder::new(&[]);
        assert!(dec.read_u8().unwrap_err().is_incomplete());
        assert!(dec.remaining().is_empty());
    }
}
