use lru::LruCache;
use tracing::trace;

use crate::cache::{CacheStatus, CacheStore, EntryRecord, StoreKind};
use crate::types::{MortonBuildHasher, TileCoord};

/// Metadata-only tier for tiles whose bytes live in the backing source.
///
/// Adding a record drops whatever payload it still carries.
pub struct NullStore {
    status: CacheStatus,
    records: LruCache<TileCoord, EntryRecord, MortonBuildHasher>,
}

impl NullStore {
    /// Null tier tagging its records `Evicted`.
    pub fn new() -> Self {
        Self::with_status(CacheStatus::Evicted)
    }

    /// Null tier tagging its records with `status`.
    pub fn with_status(status: CacheStatus) -> Self {
        Self {
            status,
            records: LruCache::unbounded_with_hasher(MortonBuildHasher::default()),
        }
    }
}

impl Default for NullStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for NullStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Null
    }

    fn add(&mut self, mut record: EntryRecord) {
        if let Some(tile) = record.take_tile() {
            trace!(coord = %record.coord(), bytes = tile.len(), "cache.null.released");
        }
        record.attach(StoreKind::Null, self.status, 0);
        self.records.push(record.coord(), record);
    }

    fn remove(&mut self, coord: TileCoord) -> Option<EntryRecord> {
        let mut record = self.records.pop(&coord)?;
        record.detach();
        Some(record)
    }

    fn size(&self) -> u64 {
        0
    }

    fn pop(&mut self) -> Option<EntryRecord> {
        let (_, mut record) = self.records.pop_lru()?;
        record.detach();
        Some(record)
    }

    fn peek(&self) -> Option<&EntryRecord> {
        self.records.peek_lru().map(|(_, record)| record)
    }

    fn get(&self, coord: TileCoord) -> Option<&EntryRecord> {
        self.records.peek(&coord)
    }

    fn get_mut(&mut self, coord: TileCoord) -> Option<&mut EntryRecord> {
        self.records.peek_mut(&coord)
    }

    fn len(&self) -> usize {
        self.records.len()
    }

    fn touch(&mut self, _coord: TileCoord) -> bool {
        false
    }

    fn coords(&self) -> Vec<TileCoord> {
        self.records.iter().rev().map(|(coord, _)| *coord).collect()
    }
}
