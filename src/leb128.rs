//! Numeric decoding helpers that aren't already covered by `gimli`.
//!
//! `gimli` decodes (S)LEB128 for everything DWARF-shaped, but the Mach-O
//! `LC_FUNCTION_STARTS` load command is a plain ULEB128 delta stream outside
//! any DWARF section, so it needs its own decoder. Grounded on
//! samply-symbols' `macho.rs::read_uleb128`, which solves the identical
//! problem for the identical reason.

/// Decodes a single ULEB128 value from the front of `bytes`.
///
/// Returns the decoded value and the remainder of the slice, or `None` if
/// the stream ends mid-encoding or the value would overflow a `u64`.
pub fn read_uleb128(mut bytes: &[u8]) -> Option<(u64, &[u8])> {
    const CONTINUATION_BIT: u8 = 1 << 7;

    let mut result: u64 = 0;
    let mut shift = 0u32;

    while !bytes.is_empty() {
        let byte = bytes[0];
        bytes = &bytes[1..];

        if shift >= 64 {
            return None;
        }

        let low_bits = u64::from(byte & !CONTINUATION_BIT);
        result |= low_bits
            .checked_shl(shift)
            .unwrap_or(0);

        if byte & CONTINUATION_BIT == 0 {
            return Some((result, bytes));
        }

        shift += 7;
    }
    None
}

/// Decodes a single SLEB128 value from the front of `bytes`, sign-extending
/// from bit 6 of the final byte per the DWARF/Mach-O convention.
pub fn read_sleb128(mut bytes: &[u8]) -> Option<(i64, &[u8])> {
    const CONTINUATION_BIT: u8 = 1 << 7;
    const SIGN_BIT: u8 = 1 << 6;

    let mut result: i64 = 0;
    let mut shift = 0u32;
    let mut byte;

    loop {
        if bytes.is_empty() {
            return None;
        }
        byte = bytes[0];
        bytes = &bytes[1..];

        if shift < 64 {
            result |= i64::from(byte & !CONTINUATION_BIT) << shift;
        }
        shift += 7;

        if byte & CONTINUATION_BIT == 0 {
            break;
        }
    }

    if shift < 64 && (byte & SIGN_BIT) != 0 {
        result |= -1i64 << shift;
    }

    Some((result, bytes))
}
