//! Wraparound-safe sequence ordering (RFC 1982 style).
//!
//! Snapshot sequence numbers are u32 counters that wrap. Ordering uses
//! half-range arithmetic: `s1` is older than `s2` iff they differ and the
//! wrapping distance from `s1` to `s2` lands in the lower half of the range.

/// Returns whether `s1` is older than `s2`.
/// `sequence_is_older(5, 10)` is true.
/// `sequence_is_older(0xFFFF_FFFF, 0)` is true (0 is newer across the wrap).
/// `sequence_is_older(n, n)` is false.
pub fn sequence_is_older(s1: u32, s2: u32) -> bool {
    s1 != s2 && (s2.wrapping_sub(s1) & 0x8000_0000) == 0
}

/// Returns whether `s1` is newer than `s2`.
pub fn sequence_is_newer(s1: u32, s2: u32) -> bool {
    sequence_is_older(s2, s1)
}
