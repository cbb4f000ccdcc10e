//! 128-bit big-endian CTR counter arithmetic.
//!
//! AES-CTR treats its 16-byte IV as the initial counter value and derives
//! the counter for block `n` by adding `n` to it as a big-endian integer,
//! with carry propagating from byte 15 (least significant) toward byte 0
//! (most significant) and wrapping on overflow past byte 0.

/// Size in bytes of one AES block, and of the counter/IV.
pub const BLOCK_SIZE: usize = 16;

/// Split a byte offset into the AES block it falls in and the offset
/// within that block.
#[must_use]
pub fn locate(position: u64) -> (u64, usize) {
    (
        position / BLOCK_SIZE as u64,
        (position % BLOCK_SIZE as u64) as usize,
    )
}

/// Compute the counter block for `block_index` blocks past `iv`.
#[must_use]
pub fn counter_at(iv: [u8; BLOCK_SIZE], block_index: u64) -> [u8; BLOCK_SIZE] {
    let base = u128::from_be_bytes(iv);
    base.wrapping_add(u128::from(block_index)).to_be_bytes()
}
