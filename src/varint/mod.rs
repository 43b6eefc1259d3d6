//! Varint Module
//!
//! Self-delimiting variable-length integers. Used for every length and type
//! tag written by the object codec and the store file.
//!
//! ## Encoding
//! ```text
//! ┌──────────────┬──────────────┬─────┬──────────────────────┐
//! │ 1 ddddddd    │ 1 ddddddd    │ ... │ 0 ddddddd  (last)     │
//! └──────────────┴──────────────┴─────┴──────────────────────┘
//!   low 7 bits first, high bit set = more bytes follow
//! ```
//! - 32-bit values take 1–5 bytes, 64-bit values 1–9 bytes.
//! - The byte at the maximum length (5th / 9th) carries its remaining bits raw
//!   and has no continuation flag.
//! - With `optimize_positive == false` the value is zigzag mapped first so
//!   small negative numbers stay short.

mod int;
mod long;

pub use int::{
    can_read_int, can_read_int_at, int_length, read_int, write_int, zigzag_decode_int,
    zigzag_encode_int, MAX_INT_BYTES,
};
pub use long::{
    can_read_long, can_read_long_at, long_length, read_long, write_long, zigzag_decode_long,
    zigzag_encode_long, MAX_LONG_BYTES,
};

/// Continuation flag carried in the high bit of every non-final byte
pub(crate) const CONTINUATION: u8 = 0x80;

/// Data bits carried in each non-final byte
pub(crate) const DATA_MASK: u8 = 0x7F;

/// True when `buf` starts with a complete encoding of at most `max_bytes` bytes
///
/// A terminator byte (high bit clear) ends an encoding early. Once `max_bytes`
/// are available the encoding is complete regardless of the last byte's bits.
pub(crate) fn is_complete(buf: &[u8], max_bytes: usize) -> bool {
    for (i, b) in buf.iter().take(max_bytes).enumerate() {
        if i == max_bytes - 1 || b & CONTINUATION == 0 {
            return true;
        }
    }
    false
}
