#![forbid(unsafe_code)]
//! Shared identifiers, coordinate hashing and the crate error type.

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasherDefault, Hash, Hasher};

/// Offset-seeded CRC32 helpers for on-disk structures.
pub mod checksum;

pub use checksum::block_crc32;

/// Number of low-order bits of each coordinate component folded into a Morton code.
pub const MORTON_BITS: u32 = 21;

/// Address of one tile: column, row and mip level.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default)]
pub struct TileCoord {
    /// Tile column.
    pub x: i32,
    /// Tile row.
    pub y: i32,
    /// Mip level, 0 being full resolution.
    pub z: i32,
}

impl TileCoord {
    /// Creates a coordinate.
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Interleaves the low [`MORTON_BITS`] bits of `x`, `y` and `z` (x most significant).
    pub fn morton(&self) -> u64 {
        let (x, y, z) = (self.x as u32, self.y as u32, self.z as u32);
        let mut code = 0u64;
        for bit in (0..MORTON_BITS).rev() {
            code <<= 3;
            code |= u64::from((x >> bit) & 1) << 2;
            code |= u64::from((y >> bit) & 1) << 1;
            code |= u64::from((z >> bit) & 1);
        }
        code
    }
}

impl Hash for TileCoord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.morton());
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{},{})", self.x, self.y, self.z)
    }
}

impl From<(i32, i32, i32)> for TileCoord {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        TileCoord::new(x, y, z)
    }
}

/// Hasher that keeps a coordinate's Morton code in the low 32 bits of the hash.
///
/// Hash tables pick buckets from the low bits, so neighbouring tiles share
/// nearby buckets. The high 32 bits are mixed so that tables which derive
/// control tags from the top of the hash still see variation.
#[derive(Clone, Copy, Debug, Default)]
pub struct MortonHasher {
    hash: u64,
}

const MORTON_MIX: u64 = 0x9E37_79B9_7F4A_7C15;
const HIGH_HALF: u64 = 0xFFFF_FFFF_0000_0000;

impl Hasher for MortonHasher {
    fn finish(&self) -> u64 {
        self.hash ^ (self.hash.wrapping_mul(MORTON_MIX) & HIGH_HALF)
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.hash = self.hash.rotate_left(8) ^ u64::from(byte);
        }
    }

    fn write_u64(&mut self, value: u64) {
        self.hash = self.hash.rotate_left(32) ^ value;
    }
}

/// `BuildHasher` for coordinate-keyed maps.
pub type MortonBuildHasher = BuildHasherDefault<MortonHasher>;

/// Hash map keyed by tile coordinate using the Morton hasher.
pub type CoordMap<V> = HashMap<TileCoord, V, MortonBuildHasher>;

/// Errors produced by the tile store.
#[derive(thiserror::Error, Debug)]
pub enum TesseraError {
    /// Underlying read, write, seek or resize failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk data that cannot be decoded.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an unusable value.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// An internal invariant broke; the backend refuses further disk access.
    #[error("fatal: {0}")]
    Fatal(&'static str),
    /// Configuration could not be loaded.
    #[error("config: {0}")]
    Config(String),
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, TesseraError>;
