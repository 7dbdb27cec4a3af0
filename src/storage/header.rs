use std::ops::Range;

use crate::storage::format::{PixelFormat, MAX_FORMAT_NAME_LEN};
use crate::types::checksum::block_crc32_excluding;
use crate::types::{Result, TesseraError};

/// Size of the header region at the start of every swap file.
pub const HEADER_LEN: usize = 256;
/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

const MAGIC: &[u8; 8] = b"TESSWAP\0";

const HDR_MAGIC: Range<usize> = 0..8;
const HDR_VERSION: Range<usize> = 8..10;
const HDR_RESERVED: Range<usize> = 10..12;
const HDR_FLAGS: Range<usize> = 12..16;
const HDR_TILE_WIDTH: Range<usize> = 16..20;
const HDR_TILE_HEIGHT: Range<usize> = 20..24;
const HDR_BYTES_PER_PIXEL: Range<usize> = 24..28;
const HDR_CRC32: Range<usize> = 28..32;
const HDR_NEXT: Range<usize> = 32..40;
const HDR_ENTRY_COUNT: Range<usize> = 40..48;
const HDR_DESCRIPTION: Range<usize> = 48..48 + MAX_FORMAT_NAME_LEN + 1;
const HDR_GENERATION: Range<usize> = 112..120;

/// Decoded swap-file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapHeader {
    /// Format version the file was written with.
    pub format_version: u16,
    /// Reserved for coordination between users of one file.
    pub flags: u32,
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
    /// Pixel format of every tile in the file.
    pub format: PixelFormat,
    /// Offset of the first index block, 0 when the file holds no index.
    pub next: u64,
    /// Number of blocks in the index chain at the last flush.
    pub entry_count: u64,
    /// Flush counter; every index block of the current chain is checksummed with it.
    pub generation: u64,
}

impl SwapHeader {
    /// Creates a header for a fresh swap file.
    pub fn new(tile_width: u32, tile_height: u32, format: PixelFormat) -> Result<Self> {
        let header = Self {
            format_version: FORMAT_VERSION,
            flags: 0,
            tile_width,
            tile_height,
            format,
            next: 0,
            entry_count: 0,
            generation: 0,
        };
        header.checked_tile_size()?;
        Ok(header)
    }

    /// Bytes per tile: width * height * bytes per pixel.
    pub fn tile_size(&self) -> usize {
        self.tile_width as usize * self.tile_height as usize * self.format.bytes_per_pixel() as usize
    }

    fn checked_tile_size(&self) -> Result<u32> {
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(TesseraError::Invalid("tile dimensions must be non-zero"));
        }
        self.tile_width
            .checked_mul(self.tile_height)
            .and_then(|px| px.checked_mul(self.format.bytes_per_pixel()))
            .ok_or(TesseraError::Invalid("tile size exceeds u32::MAX"))
    }

    /// Serialises the header into its fixed 256-byte form.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[HDR_MAGIC].copy_from_slice(MAGIC);
        buf[HDR_VERSION].copy_from_slice(&self.format_version.to_le_bytes());
        buf[HDR_FLAGS].copy_from_slice(&self.flags.to_le_bytes());
        buf[HDR_TILE_WIDTH].copy_from_slice(&self.tile_width.to_le_bytes());
        buf[HDR_TILE_HEIGHT].copy_from_slice(&self.tile_height.to_le_bytes());
        buf[HDR_BYTES_PER_PIXEL].copy_from_slice(&self.format.bytes_per_pixel().to_le_bytes());
        buf[HDR_NEXT].copy_from_slice(&self.next.to_le_bytes());
        buf[HDR_ENTRY_COUNT].copy_from_slice(&self.entry_count.to_le_bytes());
        let name = self.format.name().as_bytes();
        buf[HDR_DESCRIPTION.start..HDR_DESCRIPTION.start + name.len()].copy_from_slice(name);
        buf[HDR_GENERATION].copy_from_slice(&self.generation.to_le_bytes());
        let crc = block_crc32_excluding(0, 0, &buf, HDR_CRC32);
        buf[HDR_CRC32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Parses and verifies a header read from offset 0.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LEN {
            return Err(TesseraError::Corruption("swap header truncated"));
        }
        let buf = &buf[..HEADER_LEN];
        if &buf[HDR_MAGIC] != MAGIC {
            return Err(TesseraError::Corruption("invalid swap header magic"));
        }
        let stored_crc = u32::from_le_bytes(buf[HDR_CRC32].try_into().unwrap());
        if stored_crc != block_crc32_excluding(0, 0, buf, HDR_CRC32) {
            return Err(TesseraError::Corruption("swap header crc mismatch"));
        }
        let format_version = u16::from_le_bytes(buf[HDR_VERSION].try_into().unwrap());
        if format_version != FORMAT_VERSION {
            return Err(TesseraError::Corruption("unsupported swap format version"));
        }
        if buf[HDR_RESERVED].iter().any(|b| *b != 0) {
            return Err(TesseraError::Corruption("swap header reserved field non-zero"));
        }
        let description = &buf[HDR_DESCRIPTION];
        let name_len = description
            .iter()
            .position(|b| *b == 0)
            .ok_or(TesseraError::Corruption("pixel format name not terminated"))?;
        let name = std::str::from_utf8(&description[..name_len])
            .map_err(|_| TesseraError::Corruption("pixel format name not UTF-8"))?;
        let bytes_per_pixel = u32::from_le_bytes(buf[HDR_BYTES_PER_PIXEL].try_into().unwrap());
        let format = PixelFormat::new(name, bytes_per_pixel)
            .map_err(|_| TesseraError::Corruption("invalid pixel format in header"))?;

        let header = Self {
            format_version,
            flags: u32::from_le_bytes(buf[HDR_FLAGS].try_into().unwrap()),
            tile_width: u32::from_le_bytes(buf[HDR_TILE_WIDTH].try_into().unwrap()),
            tile_height: u32::from_le_bytes(buf[HDR_TILE_HEIGHT].try_into().unwrap()),
            format,
            next: u64::from_le_bytes(buf[HDR_NEXT].try_into().unwrap()),
            entry_count: u64::from_le_bytes(buf[HDR_ENTRY_COUNT].try_into().unwrap()),
            generation: u64::from_le_bytes(buf[HDR_GENERATION].try_into().unwrap()),
        };
        header
            .checked_tile_size()
            .map_err(|_| TesseraError::Corruption("invalid tile geometry in header"))?;
        Ok(header)
    }
}
