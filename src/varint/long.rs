//! 64-bit varints

use std::io::Cursor;

use bytes::{Buf, BufMut};

use super::{is_complete, CONTINUATION, DATA_MASK};
use crate::error::{EmberError, Result};

/// Longest encoding of a 64-bit value
pub const MAX_LONG_BYTES: usize = 9;

/// Map a signed value so that small magnitudes become small unsigned values
pub fn zigzag_encode_long(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

/// Inverse of [`zigzag_encode_long`]
pub fn zigzag_decode_long(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn prepare(value: i64, optimize_positive: bool) -> u64 {
    if optimize_positive {
        value as u64
    } else {
        zigzag_encode_long(value)
    }
}

fn encoded_len(bits: u64) -> usize {
    // 7 bits per byte up to 8 bytes, the 9th holds the last 8 bits raw
    for (len, shift) in (7..=56).step_by(7).enumerate() {
        if bits >> shift == 0 {
            return len + 1;
        }
    }
    MAX_LONG_BYTES
}

/// Number of bytes [`write_long`] produces for `value`
pub fn long_length(value: i64, optimize_positive: bool) -> usize {
    encoded_len(prepare(value, optimize_positive))
}

/// Write `value` using 1–9 bytes, returning the number written
pub fn write_long<B: BufMut>(buf: &mut B, value: i64, optimize_positive: bool) -> usize {
    let mut bits = prepare(value, optimize_positive);
    let len = encoded_len(bits);

    for _ in 1..len {
        buf.put_u8((bits as u8 & DATA_MASK) | CONTINUATION);
        bits >>= 7;
    }
    buf.put_u8(bits as u8);

    len
}

/// Read a value written by [`write_long`] with the same `optimize_positive`
pub fn read_long<B: Buf>(buf: &mut B, optimize_positive: bool) -> Result<i64> {
    let mut bits: u64 = 0;

    for i in 0..MAX_LONG_BYTES {
        if !buf.has_remaining() {
            return Err(EmberError::truncated("varint64"));
        }
        let b = buf.get_u8();

        if i == MAX_LONG_BYTES - 1 {
            bits |= (b as u64) << 56;
            break;
        }

        bits |= ((b & DATA_MASK) as u64) << (7 * i);
        if b & CONTINUATION == 0 {
            break;
        }
    }

    Ok(if optimize_positive {
        bits as i64
    } else {
        zigzag_decode_long(bits)
    })
}

/// Check whether `buf` begins with a complete 64-bit varint
pub fn can_read_long(buf: &[u8]) -> bool {
    is_complete(buf, MAX_LONG_BYTES)
}

/// Check whether a complete 64-bit varint starts at the cursor position
pub fn can_read_long_at<T: AsRef<[u8]>>(cursor: &Cursor<T>) -> bool {
    let data = cursor.get_ref().as_ref();
    usize::try_from(cursor.position())
        .ok()
        .and_then(|pos| data.get(pos..))
        .map_or(false, can_read_long)
}
