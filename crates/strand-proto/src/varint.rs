//! Variable-length integer framing.
//!
//! Message types and data lengths are encoded as unsigned varints with
//! the standard 7-bit continuation scheme: each byte carries seven value
//! bits, least significant group first, and the high bit marks that more
//! bytes follow.

use crate::errors::{ProtocolError, Result};

/// Maximum encoded size of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Number of bytes `value` occupies when encoded.
pub fn varint_len(value: u64) -> usize {
    let mut len = 1;
    let mut rest = value >> 7;
    while rest != 0 {
        len += 1;
        rest >>= 7;
    }
    len
}

/// Encode `value` into the front of `out`, returning the bytes written.
///
/// # Errors
///
/// `Encode` if `out` is too small.
pub fn encode_varint(value: u64, out: &mut [u8]) -> Result<usize> {
    let needed = varint_len(value);
    if out.len() < needed {
        return Err(ProtocolError::Encode { what: "varint" });
    }

    let mut rest = value;
    for byte in out.iter_mut().take(needed - 1) {
        *byte = (rest as u8 & 0x7F) | 0x80;
        rest >>= 7;
    }
    out[needed - 1] = rest as u8;
    Ok(needed)
}

/// Decode a varint from the front of `buf`, returning the value and the
/// bytes consumed.
///
/// # Errors
///
/// `Decode` if the buffer ends mid-varint or the value overflows 64
/// bits.
pub fn decode_varint(buf: &[u8]) -> Result<(u64, usize)> {
    let mut value: u64 = 0;
    for (idx, byte) in buf.iter().enumerate().take(MAX_VARINT_LEN) {
        let group = u64::from(byte & 0x7F);
        // The tenth byte may only contribute a single bit.
        if idx == MAX_VARINT_LEN - 1 && (byte & 0xFE) != 0 {
            return Err(ProtocolError::Decode { what: "varint" });
        }
        value |= group << (idx * 7);
        if byte & 0x80 == 0 {
            return Ok((value, idx + 1));
        }
    }
    Err(ProtocolError::Decode { what: "varint" })
}
