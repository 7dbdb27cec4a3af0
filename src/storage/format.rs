use std::fmt;

use crate::types::{Result, TesseraError};

/// Longest descriptor that fits the header's NUL-terminated description field.
pub const MAX_FORMAT_NAME_LEN: usize = 63;

const KNOWN_FORMATS: &[(&str, u32)] = &[
    ("Y u8", 1),
    ("Y' u8", 1),
    ("Y u16", 2),
    ("Y float", 4),
    ("YA float", 8),
    ("RGB u8", 3),
    ("R'G'B' u8", 3),
    ("RGBA u8", 4),
    ("R'G'B'A u8", 4),
    ("RGBA u16", 8),
    ("RGBA float", 16),
    ("RaGaBaA float", 16),
];

/// Pixel layout descriptor recorded in the swap header.
///
/// Conversion between formats happens elsewhere; the store only needs the
/// name to hand back to callers and the pixel width to size tiles.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PixelFormat {
    name: String,
    bytes_per_pixel: u32,
}

impl PixelFormat {
    /// Creates a descriptor, validating that it can be stored in the header.
    pub fn new(name: impl Into<String>, bytes_per_pixel: u32) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(TesseraError::Invalid("pixel format name is empty"));
        }
        if name.len() > MAX_FORMAT_NAME_LEN {
            return Err(TesseraError::Invalid("pixel format name too long"));
        }
        if name.as_bytes().contains(&0) {
            return Err(TesseraError::Invalid("pixel format name contains NUL"));
        }
        if bytes_per_pixel == 0 {
            return Err(TesseraError::Invalid("bytes per pixel must be non-zero"));
        }
        Ok(Self {
            name,
            bytes_per_pixel,
        })
    }

    /// Looks up one of the built-in descriptors by name.
    pub fn from_name(name: &str) -> Result<Self> {
        KNOWN_FORMATS
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(known, bpp)| Self {
                name: (*known).to_string(),
                bytes_per_pixel: *bpp,
            })
            .ok_or(TesseraError::Invalid("unknown pixel format"))
    }

    /// 8-bit gamma-encoded RGBA.
    pub fn rgba_u8() -> Self {
        Self {
            name: "R'G'B'A u8".to_string(),
            bytes_per_pixel: 4,
        }
    }

    /// Linear RGBA in 32-bit floats.
    pub fn rgba_float() -> Self {
        Self {
            name: "RGBA float".to_string(),
            bytes_per_pixel: 16,
        }
    }

    /// Single 8-bit luminance channel.
    pub fn y_u8() -> Self {
        Self {
            name: "Y u8".to_string(),
            bytes_per_pixel: 1,
        }
    }

    /// Descriptor name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Bytes occupied by one pixel.
    pub fn bytes_per_pixel(&self) -> u32 {
        self.bytes_per_pixel
    }
}

impl Default for PixelFormat {
    fn default() -> Self {
        Self::rgba_u8()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bpp)", self.name, self.bytes_per_pixel)
    }
}
