//! File-based configuration for a cached swap store.
//!
//! ```toml
//! swap_dir = "/var/tmp/tessera"
//! tile_width = 128
//! tile_height = 64
//! pixel_format = "R'G'B'A u8"
//! sync_on_flush = true
//!
//! [cache]
//! capacity_bytes = 67108864
//! write_policy = "write-back"
//! promote_on_hit = true
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cache::{CacheOptions, TileCache, WritePolicy, DEFAULT_CACHE_CAPACITY};
use crate::storage::{
    FileBackend, FileBackendOptions, PixelFormat, DEFAULT_TILE_HEIGHT, DEFAULT_TILE_WIDTH,
};
use crate::types::{Result, TesseraError};

/// Store settings as read from TOML. Every field is optional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TileStoreConfig {
    /// Directory swap files are created in.
    pub swap_dir: PathBuf,
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
    /// Pixel format name.
    pub pixel_format: String,
    /// Pixel width for a format that is not built in.
    pub bytes_per_pixel: Option<u32>,
    /// Whether flush ends with an fsync.
    pub sync_on_flush: bool,
    /// Cache tier settings.
    pub cache: CacheConfig,
}

/// The `[cache]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Heap tier capacity in bytes.
    pub capacity_bytes: u64,
    /// `write-through` or `write-back`.
    pub write_policy: WritePolicy,
    /// Reorder the heap tier on hits.
    pub promote_on_hit: bool,
}

impl Default for TileStoreConfig {
    fn default() -> Self {
        Self {
            swap_dir: std::env::temp_dir(),
            tile_width: DEFAULT_TILE_WIDTH,
            tile_height: DEFAULT_TILE_HEIGHT,
            pixel_format: PixelFormat::default().name().to_string(),
            bytes_per_pixel: None,
            sync_on_flush: true,
            cache: CacheConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_CACHE_CAPACITY,
            write_policy: WritePolicy::default(),
            promote_on_hit: true,
        }
    }
}

impl TileStoreConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| TesseraError::Config(err.to_string()))
    }

    /// Reads and parses the TOML file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|err| TesseraError::Config(format!("reading {}: {err}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        debug!(path = %path.display(), "config.loaded");
        Ok(config)
    }

    /// Serialises back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| TesseraError::Config(err.to_string()))
    }

    /// Resolves the configured pixel format.
    pub fn pixel_format(&self) -> Result<PixelFormat> {
        let format = match self.bytes_per_pixel {
            Some(bpp) => PixelFormat::new(self.pixel_format.as_str(), bpp),
            None => PixelFormat::from_name(&self.pixel_format),
        };
        format.map_err(|err| TesseraError::Config(format!("pixel_format {:?}: {err}", self.pixel_format)))
    }

    /// Backend options described by this config.
    pub fn backend_options(&self) -> Result<FileBackendOptions> {
        Ok(FileBackendOptions::default()
            .tile_dimensions(self.tile_width, self.tile_height)
            .format(self.pixel_format()?)
            .sync_on_flush(self.sync_on_flush))
    }

    /// Cache options described by this config.
    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions::default()
            .capacity_bytes(self.cache.capacity_bytes)
            .write_policy(self.cache.write_policy)
            .promote_on_hit(self.cache.promote_on_hit)
    }

    /// A fresh swap file name in `swap_dir`, unique to this process.
    pub fn swap_path(&self) -> PathBuf {
        let tag: u64 = rand::random();
        self.swap_dir
            .join(format!("{}-{tag:016x}.swap", std::process::id()))
    }

    /// Opens a cached backend on a new swap file.
    pub fn open(&self) -> Result<TileCache<FileBackend>> {
        let backend = FileBackend::open(self.swap_path(), self.backend_options()?)?;
        Ok(TileCache::new(backend, self.cache_options()))
    }
}
