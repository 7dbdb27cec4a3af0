//! Tessera: tiled raster storage backed by a private swap file.
//!
//! [`storage::FileBackend`] keeps fixed-size pixel tiles, addressed by
//! `(x, y, z)`, in slots of a swap file that is deleted on drop.
//! [`cache::TileCache`] sits in front of any [`storage::TileSource`] and moves
//! tiles between an in-memory tier and a metadata-only tier.

pub mod cache;
pub mod config;
pub mod primitives;
pub mod storage;
pub mod types;

pub use cache::{CacheOptions, TileCache, WritePolicy};
pub use config::TileStoreConfig;
pub use storage::{FileBackend, FileBackendOptions, PixelFormat, Tile, TileSource};
pub use types::{Result, TesseraError, TileCoord};
