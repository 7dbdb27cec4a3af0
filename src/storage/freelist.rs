use std::collections::HashSet;

use crate::storage::header::HEADER_LEN;

/// Number of tile slots the swap file grows by whenever the frontier reaches its end.
pub const GROWTH_SLOTS: u64 = 32;

/// Result of one slot allocation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SlotGrant {
    /// Offset of the granted slot.
    pub offset: u64,
    /// New file length the caller must apply before writing, if the file grew.
    pub grow_to: Option<u64>,
}

/// Hands out fixed-size tile slots inside the swap file.
///
/// Reclaimed offsets are kept on a stack and reused most-recently-freed first.
/// Fresh slots come from the frontier, and `total` tracks the logical file
/// length, which always stays ahead of the frontier.
#[derive(Clone, Debug)]
pub struct SlotAllocator {
    tile_size: u64,
    free: Vec<u64>,
    frontier: u64,
    total: u64,
}

impl SlotAllocator {
    /// Allocator for an empty swap file.
    pub fn new(tile_size: u64) -> Self {
        Self {
            tile_size,
            free: Vec::new(),
            frontier: HEADER_LEN as u64,
            total: HEADER_LEN as u64,
        }
    }

    /// Rebuilds allocator state from the live slots of a reopened file.
    ///
    /// The frontier becomes the end of the highest live slot and every unused
    /// slot below it is reclaimed, lowest offset on top of the stack.
    pub fn restore<I>(tile_size: u64, live: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let live: HashSet<u64> = live.into_iter().collect();
        let frontier = live
            .iter()
            .filter_map(|off| off.checked_add(tile_size))
            .max()
            .unwrap_or(HEADER_LEN as u64);
        let mut free: Vec<u64> = (0u64..)
            .map_while(|slot| {
                slot.checked_mul(tile_size)
                    .and_then(|rel| rel.checked_add(HEADER_LEN as u64))
            })
            .take_while(|off| *off < frontier)
            .filter(|off| !live.contains(off))
            .collect();
        free.reverse();
        Self {
            tile_size,
            free,
            frontier,
            total: frontier,
        }
    }

    /// Takes a slot: the free-stack head if any, otherwise a fresh slot at the frontier.
    pub fn allocate(&mut self) -> SlotGrant {
        if let Some(offset) = self.free.pop() {
            return SlotGrant {
                offset,
                grow_to: None,
            };
        }
        let offset = self.frontier;
        self.frontier += self.tile_size;
        let grow_to = if self.frontier >= self.total {
            self.total += GROWTH_SLOTS * self.tile_size;
            Some(self.total)
        } else {
            None
        };
        SlotGrant { offset, grow_to }
    }

    /// Returns a slot to the free stack.
    pub fn release(&mut self, offset: u64) {
        debug_assert!(
            !self.free.contains(&offset),
            "slot {offset} released twice"
        );
        self.free.push(offset);
    }

    /// Slot size in bytes.
    pub fn tile_size(&self) -> u64 {
        self.tile_size
    }

    /// Next fresh slot offset.
    pub fn frontier(&self) -> u64 {
        self.frontier
    }

    /// Logical file length.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Number of reclaimed slots waiting for reuse.
    pub fn free_slots(&self) -> usize {
        self.free.len()
    }

    /// Reclaimed offsets, next to be reused last.
    pub fn free_offsets(&self) -> &[u64] {
        &self.free
    }
}
