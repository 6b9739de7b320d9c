use bytes::{Buf, BufMut};
use thiserror::Error;

// QUIC variable-length integer encoding (RFC 9000 section 16).
//
// | 2MSB | Length  | Usable Bits | Range                 |
// |------|---------|-------------|-----------------------|
// | 00   | 1 byte  | 6           | 0-63                  |
// | 01   | 2 bytes | 14          | 0-16383               |
// | 10   | 4 bytes | 30          | 0-1073741823          |
// | 11   | 8 bytes | 62          | 0-4611686018427387903 |

/// Maximum value representable as a varint (2^62 - 1).
pub const MAX_VARINT: u64 = (1 << 62) - 1;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("value {0} does not fit in a varint")]
pub struct VarIntBoundsExceeded(pub u64);

pub const fn varint_len(value: u64) -> usize {
    if value <= 63 {
        1
    } else if value <= 16383 {
        2
    } else if value <= 1_073_741_823 {
        4
    } else {
        8
    }
}

pub fn encode_varint<B: BufMut>(value: u64, buf: &mut B) -> Result<(), VarIntBoundsExceeded> {
    if value > MAX_VARINT {
        return Err(VarIntBoundsExceeded(value));
    }

    match varint_len(value) {
        1 => buf.put_u8(value as u8),
        2 => buf.put_u16(0x4000 | value as u16),
        4 => buf.put_u32(0x8000_0000 | value as u32),
        _ => buf.put_u64(0xc000_0000_0000_0000 | value),
    }
    Ok(())
}

/// Reads one varint from `buf`. Returns `None` when `buf` ends in the middle
/// of the integer; the cursor is left untouched in that case.
pub fn decode_varint<B: Buf>(buf: &mut B) -> Option<u64> {
    let first = *buf.chunk().first()?;
    let len = 1usize << (first >> 6);
    if buf.remaining() < len {
        return None;
    }

    let value = match len {
        1 => u64::from(buf.get_u8() & 0x3f),
        2 => u64::from(buf.get_u16() & 0x3fff),
        4 => u64::from(buf.get_u32() & 0x3fff_ffff),
        _ => buf.get_u64() & MAX_VARINT,
    };
    Some(value)
}

/// Decodes a varint at the front of `bytes` without consuming it.
/// Returns `(value, encoded_len)`.
pub fn peek_varint(bytes: &[u8]) -> Option<(u64, usize)> {
    let mut cursor = bytes;
    let value = decode_varint(&mut cursor)?;
    Some((value, bytes.len() - cursor.len()))
}
