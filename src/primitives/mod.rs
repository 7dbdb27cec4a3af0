//! Low-level primitives the storage layer is built on.

/// Positioned file I/O with bounded retry of short transfers.
pub mod io;
