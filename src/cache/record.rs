use crate::cache::{CacheStatus, StoreKind};
use crate::storage::Tile;
use crate::types::TileCoord;

/// Cache bookkeeping for one tile.
///
/// A record belongs to at most one store at a time. The store keys its
/// ordered sequence by `coord`, which is what lets a record be unlinked and
/// moved in constant time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    coord: TileCoord,
    tile: Option<Tile>,
    status: CacheStatus,
    store: Option<StoreKind>,
    charge: u64,
}

impl EntryRecord {
    /// Ownerless record with no payload.
    pub fn new(coord: TileCoord) -> Self {
        Self {
            coord,
            tile: None,
            status: CacheStatus::Undefined,
            store: None,
            charge: 0,
        }
    }

    /// Ownerless record carrying `tile`.
    pub fn with_tile(coord: TileCoord, tile: Tile) -> Self {
        let mut record = Self::new(coord);
        record.tile = Some(tile);
        record
    }

    /// Tile address.
    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    /// Resident payload, if any.
    pub fn tile(&self) -> Option<&Tile> {
        self.tile.as_ref()
    }

    /// Mutable access to the resident payload.
    pub fn tile_mut(&mut self) -> Option<&mut Tile> {
        self.tile.as_mut()
    }

    /// Replaces the payload, returning the previous one.
    pub fn set_tile(&mut self, tile: Tile) -> Option<Tile> {
        self.tile.replace(tile)
    }

    /// Takes the payload out, leaving the record metadata-only.
    pub fn take_tile(&mut self) -> Option<Tile> {
        self.tile.take()
    }

    /// True when the record carries a payload.
    pub fn is_resident(&self) -> bool {
        self.tile.is_some()
    }

    /// True when the payload has changes that no source has seen.
    pub fn is_dirty(&self) -> bool {
        self.tile.as_ref().is_some_and(|tile| !tile.is_stored())
    }

    /// Status tag.
    pub fn status(&self) -> CacheStatus {
        self.status
    }

    /// Store currently holding the record.
    pub fn store(&self) -> Option<StoreKind> {
        self.store
    }

    /// Bytes the holding store charged for this record.
    pub fn charge(&self) -> u64 {
        self.charge
    }

    pub(crate) fn attach(&mut self, store: StoreKind, status: CacheStatus, charge: u64) {
        self.store = Some(store);
        self.status = status;
        self.charge = charge;
    }

    pub(crate) fn detach(&mut self) -> u64 {
        self.store = None;
        self.status = CacheStatus::Undefined;
        std::mem::take(&mut self.charge)
    }
}
