//! Cache tiers above a tile source.
//!
//! Records move between a [`HeapStore`] (payload resident) and a
//! [`NullStore`] (payload only in the source). [`TileCache`] drives the
//! movement.

mod handler;
mod heap;
mod null;
mod record;

pub use handler::{CacheOptions, CacheStats, TileCache, WritePolicy, DEFAULT_CACHE_CAPACITY};
pub use heap::HeapStore;
pub use null::NullStore;
pub use record::EntryRecord;

use std::fmt;

use crate::types::TileCoord;

/// Which tier a record belongs to.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StoreKind {
    /// In-memory tier.
    Heap,
    /// Metadata-only tier.
    Null,
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Heap => f.write_str("heap"),
            StoreKind::Null => f.write_str("null"),
        }
    }
}

/// Residency tag carried by an [`EntryRecord`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum CacheStatus {
    /// Not a member of any store.
    #[default]
    Undefined,
    /// Payload held in memory.
    Resident,
    /// Payload released; the source holds the bytes.
    Evicted,
}

/// Operations shared by every tier.
pub trait CacheStore {
    /// Tier identity.
    fn kind(&self) -> StoreKind;

    /// Takes ownership of `record`, updating its membership and status.
    fn add(&mut self, record: EntryRecord);

    /// Detaches the record for `coord` and hands it back ownerless.
    fn remove(&mut self, coord: TileCoord) -> Option<EntryRecord>;

    /// Removes and destroys the record for `coord`.
    fn zap(&mut self, coord: TileCoord) -> bool {
        self.remove(coord).is_some()
    }

    /// Tier-defined occupancy.
    fn size(&self) -> u64;

    /// Removes the record the tier would give up first.
    fn pop(&mut self) -> Option<EntryRecord>;

    /// The record `pop` would return.
    fn peek(&self) -> Option<&EntryRecord>;

    /// Looks up a record without reordering.
    fn get(&self, coord: TileCoord) -> Option<&EntryRecord>;

    /// Mutable lookup without reordering.
    fn get_mut(&mut self, coord: TileCoord) -> Option<&mut EntryRecord>;

    /// Whether the tier holds a record for `coord`.
    fn contains(&self, coord: TileCoord) -> bool {
        self.get(coord).is_some()
    }

    /// Number of records.
    fn len(&self) -> usize;

    /// True when the tier holds nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves the record to the back of the order; false when absent or unordered.
    fn touch(&mut self, coord: TileCoord) -> bool;

    /// Coordinates in `pop` order.
    fn coords(&self) -> Vec<TileCoord>;
}

/// The closed set of tiers.
pub enum Store {
    /// See [`HeapStore`].
    Heap(HeapStore),
    /// See [`NullStore`].
    Null(NullStore),
}

impl From<HeapStore> for Store {
    fn from(store: HeapStore) -> Self {
        Store::Heap(store)
    }
}

impl From<NullStore> for Store {
    fn from(store: NullStore) -> Self {
        Store::Null(store)
    }
}

macro_rules! dispatch {
    ($self:expr, $store:ident => $body:expr) => {
        match $self {
            Store::Heap($store) => $body,
            Store::Null($store) => $body,
        }
    };
}

impl CacheStore for Store {
    fn kind(&self) -> StoreKind {
        dispatch!(self, s => s.kind())
    }

    fn add(&mut self, record: EntryRecord) {
        dispatch!(self, s => s.add(record))
    }

    fn remove(&mut self, coord: TileCoord) -> Option<EntryRecord> {
        dispatch!(self, s => s.remove(coord))
    }

    fn zap(&mut self, coord: TileCoord) -> bool {
        dispatch!(self, s => s.zap(coord))
    }

    fn size(&self) -> u64 {
        dispatch!(self, s => s.size())
    }

    fn pop(&mut self) -> Option<EntryRecord> {
        dispatch!(self, s => s.pop())
    }

    fn peek(&self) -> Option<&EntryRecord> {
        dispatch!(self, s => s.peek())
    }

    fn get(&self, coord: TileCoord) -> Option<&EntryRecord> {
        dispatch!(self, s => s.get(coord))
    }

    fn get_mut(&mut self, coord: TileCoord) -> Option<&mut EntryRecord> {
        dispatch!(self, s => s.get_mut(coord))
    }

    fn len(&self) -> usize {
        dispatch!(self, s => s.len())
    }

    fn touch(&mut self, coord: TileCoord) -> bool {
        dispatch!(self, s => s.touch(coord))
    }

    fn coords(&self) -> Vec<TileCoord> {
        dispatch!(self, s => s.coords())
    }
}
