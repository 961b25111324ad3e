//! Capacity-tier arithmetic for the growable-array allocator.
//!
//! Every growable array is allocated at a power-of-two tier rather than its exact
//! requested length, so that `push` across most length boundaries is O(1) amortised:
//! only crossing a tier boundary requires a `realloc`.

/// The next power of two, minimum 4, at or above `len`.
pub fn cap_for_len(len: u32) -> u32 {
    let min = len.max(4);
    min.next_power_of_two()
}

/// Byte size of a tier of `cap` elements of `elem_bytes` each, rounded up to 8 bytes
/// so that f64-sized slots always land on an 8-byte boundary.
pub fn tier_byte_size(cap: u32, elem_bytes: u32) -> u32 {
    let raw = cap * elem_bytes;
    (raw + 7) & !7
}
