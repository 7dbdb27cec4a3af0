#![forbid(unsafe_code)]

use std::ops::Range;

/// CRC32 of an on-disk structure, seeded with the offset it lives at and a salt.
///
/// Seeding with the offset makes a block copied to the wrong place fail
/// verification even when its bytes are intact. The salt is the flush
/// generation, so a block left over from an earlier flush at the same
/// position fails as well.
pub fn block_crc32(offset: u64, salt: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&offset.to_le_bytes());
    hasher.update(&salt.to_le_bytes());
    hasher.update(payload);
    hasher.finalize()
}

/// Computes [`block_crc32`] over `buf` with the `crc_field` bytes treated as zero.
pub fn block_crc32_excluding(
    offset: u64,
    salt: u64,
    buf: &[u8],
    crc_field: Range<usize>,
) -> u32 {
    debug_assert_eq!(crc_field.len(), 4, "crc field must be 4 bytes");
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&offset.to_le_bytes());
    hasher.update(&salt.to_le_bytes());
    hasher.update(&buf[..crc_field.start]);
    hasher.update(&[0u8; 4]);
    hasher.update(&buf[crc_field.end..]);
    hasher.finalize()
}
