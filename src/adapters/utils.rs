//! Shared text helpers for the CLI front end and node labels.
//!
//! Used by the command parser, the NodeLabel write path and unique-id
//! generation, so they live in one place.

use core::fmt::Write;

/// Returns `true` if every byte of `s` is in the printable ASCII range
/// `0x20..=0x7E` (space through tilde, inclusive).
///
/// Node labels are shown by fabric controllers verbatim.
pub(crate) fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

/// Parse a `u16` written either in decimal or with a `0x` prefix.
pub(crate) fn parse_u16(token: &str) -> Option<u16> {
    match token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => token.parse().ok(),
    }
}

/// Lowercase hex encoding into a fixed-capacity string.
///
/// Stops silently once `N` is reached.
pub(crate) fn hex_encode<const N: usize>(bytes: &[u8]) -> heapless::String<N> {
    let mut out = heapless::String::new();
    for b in bytes {
        if write!(out, "{:02x}", b).is_err() {
            break;
        }
    }
    out
}
