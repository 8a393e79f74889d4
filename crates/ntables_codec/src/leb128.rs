//! Unsigned LEB128 varints.
//!
//! Seven data bits per byte, least significant group first, high bit set
//! on every byte except the last.

use crate::error::{CodecError, CodecResult};
use bytes::BufMut;

/// Longest encoding of a `u64`.
pub const MAX_LEB128_LEN: usize = 10;

/// Append the unsigned LEB128 encoding of `value` to `out`.
pub fn write_unsigned_leb128<B: BufMut>(out: &mut B, mut value: u64) {
    loop {
        #[allow(clippy::cast_possible_truncation)]
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.put_u8(byte);
            return;
        }
        out.put_u8(byte | 0x80);
    }
}

/// Encode `value` as unsigned LEB128 into a fresh buffer.
pub fn to_unsigned_leb128(value: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(unsigned_leb128_len(value));
    write_unsigned_leb128(&mut out, value);
    out
}

/// Number of bytes the unsigned LEB128 encoding of `value` takes.
pub fn unsigned_leb128_len(value: u64) -> usize {
    let bits = 64 - value.leading_zeros() as usize;
    bits.div_ceil(7).max(1)
}

/// Decode an unsigned LEB128 value starting at `offset`.
///
/// Returns the value and the offset of the first byte after it.
///
/// # Errors
///
/// `BufferTooShort` if the buffer ends before the final byte,
/// `VarintOverflow` if the value does not fit in 64 bits.
pub fn read_unsigned_leb128(buf: &[u8], offset: usize) -> CodecResult<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0u32;
    let mut pos = offset;

    loop {
        let Some(&byte) = buf.get(pos) else {
            return Err(CodecError::too_short(buf.len(), offset, pos - offset + 1));
        };
        pos += 1;

        let bits = u64::from(byte & 0x7f);
        if shift >= 64 || (shift == 63 && bits > 1) {
            return Err(CodecError::VarintOverflow);
        }
        result |= bits << shift;

        if byte & 0x80 == 0 {
            return Ok((result, pos));
        }
        shift += 7;
    }
}
