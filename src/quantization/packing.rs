//! Dense little-endian bit streams of `nbits`-wide codes.
//!
//! The first code occupies the lowest bits of the first byte; codes may
//! straddle byte boundaries. With `nbits == 4` this is the usual two
//! nibbles per byte, low nibble first.

use crate::error::{Error, Result};

/// Bytes needed to hold `count` codes of `nbits` each. Cannot overflow for
/// `nbits <= 8`.
pub fn packed_len(count: usize, nbits: u8) -> usize {
    let nbits = nbits as usize;
    count / 8 * nbits + (count % 8 * nbits).div_ceil(8)
}

pub fn pack_bits(codes: &[u32], nbits: u8) -> Vec<u8> {
    let mask = (1u64 << nbits) - 1;
    let mut packed = Vec::with_capacity(packed_len(codes.len(), nbits));

    let mut acc: u64 = 0;
    let mut filled: u32 = 0;
    for &q in codes {
        acc |= (q as u64 & mask) << filled;
        filled += nbits as u32;
        while filled >= 8 {
            packed.push(acc as u8);
            acc >>= 8;
            filled -= 8;
        }
    }
    if filled > 0 {
        packed.push(acc as u8);
    }

    packed
}

pub fn unpack_bits(packed: &[u8], nbits: u8, count: usize) -> Result<Vec<u32>> {
    let expected = packed_len(count, nbits);
    if packed.len() < expected {
        return Err(Error::DimensionMismatch {
            expected,
            actual: packed.len(),
        });
    }

    let mask = (1u64 << nbits) - 1;
    let mut codes = Vec::with_capacity(count);

    let mut acc: u64 = 0;
    let mut filled: u32 = 0;
    for &byte in &packed[..expected] {
        acc |= (byte as u64) << filled;
        filled += 8;
        while filled >= nbits as u32 && codes.len() < count {
            codes.push((acc & mask) as u32);
            acc >>= nbits;
            filled -= nbits as u32;
        }
    }

    Ok(codes)
}
