//! 32-bit varints

use std::io::Cursor;

use bytes::{Buf, BufMut};

use super::{is_complete, CONTINUATION, DATA_MASK};
use crate::error::{EmberError, Result};

/// Longest encoding of a 32-bit value
pub const MAX_INT_BYTES: usize = 5;

/// Map a signed value so that small magnitudes become small unsigned values
pub fn zigzag_encode_int(value: i32) -> u32 {
    ((value << 1) ^ (value >> 31)) as u32
}

/// Inverse of [`zigzag_encode_int`]
pub fn zigzag_decode_int(value: u32) -> i32 {
    ((value >> 1) as i32) ^ -((value & 1) as i32)
}

fn prepare(value: i32, optimize_positive: bool) -> u32 {
    if optimize_positive {
        value as u32
    } else {
        zigzag_encode_int(value)
    }
}

fn encoded_len(bits: u32) -> usize {
    if bits >> 7 == 0 {
        1
    } else if bits >> 14 == 0 {
        2
    } else if bits >> 21 == 0 {
        3
    } else if bits >> 28 == 0 {
        4
    } else {
        5
    }
}

/// Number of bytes [`write_int`] produces for `value`
pub fn int_length(value: i32, optimize_positive: bool) -> usize {
    encoded_len(prepare(value, optimize_positive))
}

/// Write `value` using 1–5 bytes, returning the number written
pub fn write_int<B: BufMut>(buf: &mut B, value: i32, optimize_positive: bool) -> usize {
    let mut bits = prepare(value, optimize_positive);
    let len = encoded_len(bits);

    for _ in 1..len {
        buf.put_u8((bits as u8 & DATA_MASK) | CONTINUATION);
        bits >>= 7;
    }
    buf.put_u8(bits as u8);

    len
}

/// Read a value written by [`write_int`] with the same `optimize_positive`
pub fn read_int<B: Buf>(buf: &mut B, optimize_positive: bool) -> Result<i32> {
    let mut bits: u32 = 0;

    for i in 0..MAX_INT_BYTES {
        if !buf.has_remaining() {
            return Err(EmberError::truncated("varint32"));
        }
        let b = buf.get_u8();

        if i == MAX_INT_BYTES - 1 {
            bits |= (b as u32) << 28;
            break;
        }

        bits |= ((b & DATA_MASK) as u32) << (7 * i);
        if b & CONTINUATION == 0 {
            break;
        }
    }

    Ok(if optimize_positive {
        bits as i32
    } else {
        zigzag_decode_int(bits)
    })
}

/// Check whether `buf` begins with a complete 32-bit varint
pub fn can_read_int(buf: &[u8]) -> bool {
    is_complete(buf, MAX_INT_BYTES)
}

/// Check whether a complete 32-bit varint starts at the cursor position
///
/// The cursor is only borrowed, so its position is never moved.
pub fn can_read_int_at<T: AsRef<[u8]>>(cursor: &Cursor<T>) -> bool {
    let data = cursor.get_ref().as_ref();
    usize::try_from(cursor.position())
        .ok()
        .and_then(|pos| data.get(pos..))
        .map_or(false, can_read_int)
}
