use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::cache::{CacheStatus, CacheStore, EntryRecord, HeapStore, NullStore, Store, StoreKind};
use crate::storage::{Tile, TileSource};
use crate::types::{Result, TesseraError, TileCoord};

/// Default heap tier capacity in bytes.
pub const DEFAULT_CACHE_CAPACITY: u64 = 64 * 1024 * 1024;

/// When payloads written through the cache reach the source.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WritePolicy {
    /// Every set is written to the source before it is cached.
    #[default]
    WriteThrough,
    /// Sets are cached dirty and written on eviction, idle or flush.
    WriteBack,
}

/// Tuning for a [`TileCache`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheOptions {
    /// Bytes of payload the heap tier may hold before it evicts.
    pub capacity_bytes: u64,
    /// Write policy for sets.
    pub write_policy: WritePolicy,
    /// Whether a heap hit moves the record to the back of the eviction order.
    pub promote_on_hit: bool,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            capacity_bytes: DEFAULT_CACHE_CAPACITY,
            write_policy: WritePolicy::default(),
            promote_on_hit: true,
        }
    }
}

impl CacheOptions {
    /// Sets the heap capacity.
    pub fn capacity_bytes(mut self, bytes: u64) -> Self {
        self.capacity_bytes = bytes;
        self
    }

    /// Sets the write policy.
    pub fn write_policy(mut self, policy: WritePolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Enables or disables promotion on hit.
    pub fn promote_on_hit(mut self, enabled: bool) -> Self {
        self.promote_on_hit = enabled;
        self
    }
}

/// Counters describing cache activity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Gets answered from the heap tier.
    pub hits: u64,
    /// Gets that went to the source.
    pub misses: u64,
    /// Records moved from the heap tier to the null tier.
    pub evictions: u64,
    /// Dirty payloads written to the source.
    pub writebacks: u64,
    /// Records in the heap tier.
    pub resident_tiles: u64,
    /// Payload bytes in the heap tier.
    pub resident_bytes: u64,
    /// Records in the null tier.
    pub evicted_tiles: u64,
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hits={} misses={} evictions={} writebacks={} resident={} ({} bytes) evicted={}",
            self.hits,
            self.misses,
            self.evictions,
            self.writebacks,
            self.resident_tiles,
            self.resident_bytes,
            self.evicted_tiles,
        )
    }
}

/// Two-tier cache in front of a [`TileSource`].
///
/// Reads are served from the heap tier when possible. Records pushed out of
/// the heap go to the null tier only after their bytes are known to be in
/// the source.
pub struct TileCache<S: TileSource> {
    source: S,
    heap: Store,
    null: Store,
    options: CacheOptions,
    hits: u64,
    misses: u64,
    evictions: u64,
    writebacks: u64,
}

impl<S: TileSource> TileCache<S> {
    /// Wraps `source` with the given options.
    pub fn new(source: S, options: CacheOptions) -> Self {
        Self {
            source,
            heap: Store::from(HeapStore::new()),
            null: Store::from(NullStore::new()),
            options,
            hits: 0,
            misses: 0,
            evictions: 0,
            writebacks: 0,
        }
    }

    /// Active options.
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    /// The wrapped source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Mutable access to the wrapped source. Changes made here bypass the cache.
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Writes back every dirty payload and returns the source.
    pub fn into_inner(mut self) -> Result<S> {
        self.write_back_all()?;
        Ok(self.source)
    }

    /// Returns a copy of the tile at `coord`.
    pub fn get(&mut self, coord: TileCoord) -> Result<Option<Tile>> {
        if let Some(tile) = self.heap.get(coord).and_then(EntryRecord::tile) {
            let tile = tile.clone();
            self.hits += 1;
            if self.options.promote_on_hit {
                self.heap.touch(coord);
            }
            trace!(coord = %coord, "cache.hit");
            return Ok(Some(tile));
        }
        self.misses += 1;
        let parked = self.null.remove(coord);
        match self.source.get_tile(coord) {
            Ok(Some(tile)) => {
                debug!(coord = %coord, evicted = parked.is_some(), "cache.miss.loaded");
                let mut record = parked.unwrap_or_else(|| EntryRecord::new(coord));
                record.set_tile(tile.clone());
                self.heap.add(record);
                self.trim()?;
                Ok(Some(tile))
            }
            Ok(None) => {
                if parked.is_some() {
                    warn!(coord = %coord, "cache.miss.source_lost_tile");
                }
                Ok(None)
            }
            Err(err) => {
                if let Some(record) = parked {
                    self.null.add(record);
                }
                Err(err)
            }
        }
    }

    /// Stores `tile` at `coord` according to the write policy.
    ///
    /// Under write-back, room for the payload is made before it is cached. If
    /// writing back an older tile fails, the error is returned and `coord`
    /// keeps whatever record it had. A payload larger than the whole capacity
    /// is written back and demoted at once; should that write fail, it stays
    /// resident and dirty and the error is returned.
    pub fn set(&mut self, coord: TileCoord, tile: &mut Tile) -> Result<()> {
        if tile.len() != self.source.tile_size() {
            return Err(TesseraError::Invalid(
                "tile payload size does not match source tile size",
            ));
        }
        let previous = self.take_record(coord);
        let made_room = match self.options.write_policy {
            WritePolicy::WriteThrough => self.source.set_tile(coord, tile),
            WritePolicy::WriteBack => {
                let room = self.options.capacity_bytes.saturating_sub(tile.len() as u64);
                self.trim_to(room)
            }
        };
        if let Err(err) = made_room {
            if let Some((kind, record)) = previous {
                self.tier(kind).add(record);
            }
            return Err(err);
        }
        let mut record = previous
            .map(|(_, record)| record)
            .unwrap_or_else(|| EntryRecord::new(coord));
        record.set_tile(tile.clone());
        self.heap.add(record);
        trace!(coord = %coord, policy = ?self.options.write_policy, "cache.set");
        self.trim()
    }

    /// Forgets the tile in every tier and in the source.
    pub fn void(&mut self, coord: TileCoord) -> Result<bool> {
        let zapped = self.heap.zap(coord) || self.null.zap(coord);
        let voided = self.source.void_tile(coord)?;
        if zapped || voided {
            debug!(coord = %coord, "cache.void");
        }
        Ok(zapped || voided)
    }

    /// Whether any tier or the source knows `coord`.
    pub fn exists(&self, coord: TileCoord) -> bool {
        self.heap.contains(coord) || self.null.contains(coord) || self.source.tile_exists(coord)
    }

    /// Writes back dirty payloads, then flushes the source.
    pub fn flush(&mut self) -> Result<()> {
        let written = self.write_back_all()?;
        debug!(written, "cache.flush");
        self.source.flush()
    }

    /// Writes back the oldest dirty payload, or lets the source idle.
    pub fn idle(&mut self) -> Result<bool> {
        let oldest_dirty = self
            .heap
            .coords()
            .into_iter()
            .find(|coord| self.heap.get(*coord).is_some_and(EntryRecord::is_dirty));
        match oldest_dirty {
            Some(coord) => self.write_back(coord),
            None => self.source.idle(),
        }
    }

    /// Moves the record for `coord` from the heap to the null tier.
    ///
    /// Returns false when the tile is not resident.
    pub fn evict(&mut self, coord: TileCoord) -> Result<bool> {
        let Some(record) = self.heap.remove(coord) else {
            return Ok(false);
        };
        self.demote(record)?;
        Ok(true)
    }

    /// Tier status of `coord`.
    pub fn status(&self, coord: TileCoord) -> CacheStatus {
        self.heap
            .get(coord)
            .or_else(|| self.null.get(coord))
            .map_or(CacheStatus::Undefined, EntryRecord::status)
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            writebacks: self.writebacks,
            resident_tiles: self.heap.len() as u64,
            resident_bytes: self.heap.size(),
            evicted_tiles: self.null.len() as u64,
        }
    }

    fn tier(&mut self, kind: StoreKind) -> &mut Store {
        match kind {
            StoreKind::Heap => &mut self.heap,
            StoreKind::Null => &mut self.null,
        }
    }

    fn take_record(&mut self, coord: TileCoord) -> Option<(StoreKind, EntryRecord)> {
        if let Some(record) = self.heap.remove(coord) {
            return Some((StoreKind::Heap, record));
        }
        self.null
            .remove(coord)
            .map(|record| (StoreKind::Null, record))
    }

    fn write_back(&mut self, coord: TileCoord) -> Result<bool> {
        let Some(tile) = self.heap.get_mut(coord).and_then(EntryRecord::tile_mut) else {
            return Ok(false);
        };
        if tile.is_stored() {
            return Ok(false);
        }
        if let Err(err) = self.source.set_tile(coord, tile) {
            warn!(coord = %coord, error = %err, "cache.writeback.failed");
            return Err(err);
        }
        self.writebacks += 1;
        trace!(coord = %coord, "cache.writeback");
        Ok(true)
    }

    fn write_back_all(&mut self) -> Result<u64> {
        let mut written = 0;
        for coord in self.heap.coords() {
            if self.write_back(coord)? {
                written += 1;
            }
        }
        Ok(written)
    }

    fn demote(&mut self, mut record: EntryRecord) -> Result<()> {
        let coord = record.coord();
        let result = match record.tile_mut() {
            Some(tile) if !tile.is_stored() => self.source.set_tile(coord, tile).map(|()| true),
            _ => Ok(false),
        };
        match result {
            Ok(wrote) => {
                if wrote {
                    self.writebacks += 1;
                }
                self.null.add(record);
                self.evictions += 1;
                debug!(coord = %coord, wrote, "cache.evict");
                Ok(())
            }
            Err(err) => {
                warn!(coord = %coord, error = %err, "cache.evict.failed");
                self.heap.add(record);
                Err(err)
            }
        }
    }

    fn trim(&mut self) -> Result<()> {
        self.trim_to(self.options.capacity_bytes)
    }

    fn trim_to(&mut self, limit: u64) -> Result<()> {
        while self.heap.size() > limit {
            let Some(record) = self.heap.pop() else {
                break;
            };
            self.demote(record)?;
        }
        Ok(())
    }
}

impl<S: TileSource> TileSource for TileCache<S> {
    fn tile_size(&self) -> usize {
        self.source.tile_size()
    }

    fn get_tile(&mut self, coord: TileCoord) -> Result<Option<Tile>> {
        self.get(coord)
    }

    fn set_tile(&mut self, coord: TileCoord, tile: &mut Tile) -> Result<()> {
        self.set(coord, tile)
    }

    fn void_tile(&mut self, coord: TileCoord) -> Result<bool> {
        self.void(coord)
    }

    fn tile_exists(&self, coord: TileCoord) -> bool {
        self.exists(coord)
    }

    fn flush(&mut self) -> Result<()> {
        TileCache::flush(self)
    }

    fn idle(&mut self) -> Result<bool> {
        TileCache::idle(self)
    }
}
