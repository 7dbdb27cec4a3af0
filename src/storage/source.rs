use crate::storage::tile::Tile;
use crate::types::{Result, TileCoord};

/// Commands understood by every tile source.
#[derive(Debug)]
pub enum TileCommand<'a> {
    /// Fetch the tile.
    Get,
    /// Store the payload; it is marked stored on success.
    Set(&'a mut Tile),
    /// Forget the tile.
    Void,
    /// Presence check.
    Exists,
    /// Persist whatever the source keeps in volatile form.
    Flush,
    /// Give the source a chance to do deferred work.
    Idle,
}

/// Answer to a [`TileCommand`].
#[derive(Debug, PartialEq, Eq)]
pub enum CommandReply {
    /// Result of `Get`.
    Tile(Option<Tile>),
    /// `Set` completed.
    Stored,
    /// Result of `Void`: whether anything was removed.
    Voided(bool),
    /// Result of `Exists`.
    Exists(bool),
    /// `Flush` completed.
    Flushed,
    /// Result of `Idle`: whether any work was done.
    Idle(bool),
}

/// Coordinate-addressed tile storage.
///
/// Implemented by the swap-file backend and by the cache layer that sits in
/// front of any source.
pub trait TileSource {
    /// Byte length every payload must have.
    fn tile_size(&self) -> usize;

    /// Returns the tile, or `None` when the source has no entry for it.
    fn get_tile(&mut self, coord: TileCoord) -> Result<Option<Tile>>;

    /// Stores `tile` at `coord` and marks it stored.
    fn set_tile(&mut self, coord: TileCoord, tile: &mut Tile) -> Result<()>;

    /// Removes the tile; returns false when nothing was there.
    fn void_tile(&mut self, coord: TileCoord) -> Result<bool>;

    /// Presence check that never touches payload bytes.
    fn tile_exists(&self, coord: TileCoord) -> bool;

    /// Makes the current contents durable.
    fn flush(&mut self) -> Result<()>;

    /// Deferred-work hook; returns whether anything was done.
    fn idle(&mut self) -> Result<bool> {
        Ok(false)
    }

    /// Single entry point dispatching a command to the methods above.
    fn command(&mut self, coord: TileCoord, command: TileCommand<'_>) -> Result<CommandReply> {
        match command {
            TileCommand::Get => self.get_tile(coord).map(CommandReply::Tile),
            TileCommand::Set(tile) => self.set_tile(coord, tile).map(|()| CommandReply::Stored),
            TileCommand::Void => self.void_tile(coord).map(CommandReply::Voided),
            TileCommand::Exists => Ok(CommandReply::Exists(self.tile_exists(coord))),
            TileCommand::Flush => self.flush().map(|()| CommandReply::Flushed),
            TileCommand::Idle => self.idle().map(CommandReply::Idle),
        }
    }
}
