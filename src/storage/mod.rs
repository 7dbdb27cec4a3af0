//! Swap-file tile storage.
//!
//! A [`FileBackend`] keeps fixed-size tiles in slots of a private swap file,
//! tracks them with a coordinate-hashed index and persists that index as a
//! linked chain of blocks on flush.

/// Pixel format descriptors.
pub mod format;
/// Fixed 256-byte swap header.
pub mod header;
/// In-memory tile index and the on-disk index chain.
pub mod index;
/// Slot allocation: free stack and growth frontier.
pub mod freelist;
/// Owned tile payloads.
pub mod tile;
/// The coordinate-addressed command protocol.
pub mod source;

mod file_backend;

pub use file_backend::{
    BackendStats, FileBackend, FileBackendOptions, DEFAULT_TILE_HEIGHT, DEFAULT_TILE_WIDTH,
};
pub use format::PixelFormat;
pub use header::{SwapHeader, FORMAT_VERSION, HEADER_LEN};
pub use source::{CommandReply, TileCommand, TileSource};
pub use tile::Tile;
