use lru::LruCache;
use tracing::trace;

use crate::cache::{CacheStatus, CacheStore, EntryRecord, StoreKind};
use crate::types::{MortonBuildHasher, TileCoord};

/// In-memory tier holding resident payloads in insertion order.
///
/// `pop` and `peek` look at the oldest record. Reordering on access is left
/// to the caller through [`CacheStore::touch`].
pub struct HeapStore {
    records: LruCache<TileCoord, EntryRecord, MortonBuildHasher>,
    bytes: u64,
}

impl HeapStore {
    /// Creates an empty heap tier.
    pub fn new() -> Self {
        Self {
            records: LruCache::unbounded_with_hasher(MortonBuildHasher::default()),
            bytes: 0,
        }
    }

    fn release(&mut self, mut record: EntryRecord) -> EntryRecord {
        self.bytes -= record.detach();
        record
    }
}

impl Default for HeapStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore for HeapStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Heap
    }

    fn add(&mut self, mut record: EntryRecord) {
        if let Some(previous) = self.records.pop(&record.coord()) {
            self.release(previous);
        }
        let charge = record.tile().map_or(0, |tile| tile.len() as u64);
        record.attach(StoreKind::Heap, CacheStatus::Resident, charge);
        self.bytes += charge;
        trace!(coord = %record.coord(), charge, total = self.bytes, "cache.heap.add");
        self.records.push(record.coord(), record);
    }

    fn remove(&mut self, coord: TileCoord) -> Option<EntryRecord> {
        let record = self.records.pop(&coord)?;
        Some(self.release(record))
    }

    fn size(&self) -> u64 {
        self.bytes
    }

    fn pop(&mut self) -> Option<EntryRecord> {
        let (_, record) = self.records.pop_lru()?;
        Some(self.release(record))
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

    fn touch(&mut self, coord: TileCoord) -> bool {
        if self.records.contains(&coord) {
            self.records.promote(&coord);
            true
        } else {
            false
        }
    }

    fn coords(&self) -> Vec<TileCoord> {
        self.records.iter().rev().map(|(coord, _)| *coord).collect()
    }
}
