//! In-memory tile index and its on-disk block chain.
//!
//! The chain is a singly linked list of fixed-length blocks, one per tile
//! entry. Each block stores the absolute offset of the next, so the writer
//! holds one block back until the position of its successor is known.

use std::ops::Range;

use tracing::{debug, warn};

use crate::primitives::io::FileIo;
use crate::storage::header::HEADER_LEN;
use crate::types::checksum::block_crc32_excluding;
use crate::types::{CoordMap, Result, TesseraError, TileCoord};

/// Encoded length of one index block.
pub const BLOCK_LEN: usize = 48;
/// Block flag marking a tile entry.
pub const BLOCK_FLAG_TILE: u32 = 1;

const BLK_LENGTH: Range<usize> = 0..4;
const BLK_FLAGS: Range<usize> = 4..8;
const BLK_NEXT: Range<usize> = 8..16;
const BLK_X: Range<usize> = 16..20;
const BLK_Y: Range<usize> = 20..24;
const BLK_Z: Range<usize> = 24..28;
const BLK_TILE_LEN: Range<usize> = 28..32;
const BLK_OFFSET: Range<usize> = 32..40;
const BLK_RESERVED: Range<usize> = 40..44;
const BLK_CRC32: Range<usize> = 44..48;

/// Where one tile's bytes live in the swap file.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TileEntry {
    /// Tile address.
    pub coord: TileCoord,
    /// Absolute offset of the tile slot.
    pub offset: u64,
}

/// Coordinate to slot-offset map.
#[derive(Clone, Debug, Default)]
pub struct TileIndex {
    entries: CoordMap<u64>,
}

impl TileIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset of the tile at `coord`.
    pub fn get(&self, coord: TileCoord) -> Option<u64> {
        self.entries.get(&coord).copied()
    }

    /// Records `coord` at `offset`, returning any previous offset.
    pub fn insert(&mut self, coord: TileCoord, offset: u64) -> Option<u64> {
        self.entries.insert(coord, offset)
    }

    /// Drops the entry for `coord`, returning its offset.
    pub fn remove(&mut self, coord: TileCoord) -> Option<u64> {
        self.entries.remove(&coord)
    }

    /// Whether an entry exists for `coord`.
    pub fn contains(&self, coord: TileCoord) -> bool {
        self.entries.contains_key(&coord)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no entries exist.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in hash order.
    pub fn iter(&self) -> impl Iterator<Item = TileEntry> + '_ {
        self.entries
            .iter()
            .map(|(coord, offset)| TileEntry {
                coord: *coord,
                offset: *offset,
            })
    }
}

/// One record of the on-disk index chain.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IndexBlock {
    /// Encoded length of this block.
    pub length: u32,
    /// Block flags.
    pub flags: u32,
    /// Offset of the following block, 0 at the end of the chain.
    pub next: u64,
    /// Payload length of the described tile.
    pub tile_len: u32,
    /// The described tile.
    pub entry: TileEntry,
}

impl IndexBlock {
    /// Block describing `entry`, not yet linked.
    pub fn for_entry(entry: TileEntry, tile_len: u32) -> Self {
        Self {
            length: BLOCK_LEN as u32,
            flags: BLOCK_FLAG_TILE,
            next: 0,
            tile_len,
            entry,
        }
    }

    /// Encodes the block as it will be stored at `at` by flush `generation`.
    pub fn encode(&self, at: u64, generation: u64) -> [u8; BLOCK_LEN] {
        let mut buf = [0u8; BLOCK_LEN];
        buf[BLK_LENGTH].copy_from_slice(&self.length.to_le_bytes());
        buf[BLK_FLAGS].copy_from_slice(&self.flags.to_le_bytes());
        buf[BLK_NEXT].copy_from_slice(&self.next.to_le_bytes());
        buf[BLK_X].copy_from_slice(&self.entry.coord.x.to_le_bytes());
        buf[BLK_Y].copy_from_slice(&self.entry.coord.y.to_le_bytes());
        buf[BLK_Z].copy_from_slice(&self.entry.coord.z.to_le_bytes());
        buf[BLK_TILE_LEN].copy_from_slice(&self.tile_len.to_le_bytes());
        buf[BLK_OFFSET].copy_from_slice(&self.entry.offset.to_le_bytes());
        let crc = block_crc32_excluding(at, generation, &buf, BLK_CRC32);
        buf[BLK_CRC32].copy_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Decodes and verifies a block read from `at`, written by flush `generation`.
    pub fn decode(buf: &[u8], at: u64, generation: u64) -> Result<Self> {
        if buf.len() < BLOCK_LEN {
            return Err(TesseraError::Corruption("index block truncated"));
        }
        let buf = &buf[..BLOCK_LEN];
        let stored_crc = u32::from_le_bytes(buf[BLK_CRC32].try_into().unwrap());
        if stored_crc != block_crc32_excluding(at, generation, buf, BLK_CRC32) {
            return Err(TesseraError::Corruption("index block crc mismatch"));
        }
        let length = u32::from_le_bytes(buf[BLK_LENGTH].try_into().unwrap());
        if length as usize != BLOCK_LEN {
            return Err(TesseraError::Corruption("index block length mismatch"));
        }
        let flags = u32::from_le_bytes(buf[BLK_FLAGS].try_into().unwrap());
        if flags & BLOCK_FLAG_TILE == 0 {
            return Err(TesseraError::Corruption("index block is not a tile entry"));
        }
        if buf[BLK_RESERVED].iter().any(|b| *b != 0) {
            return Err(TesseraError::Corruption("index block reserved field non-zero"));
        }
        let coord = TileCoord::new(
            i32::from_le_bytes(buf[BLK_X].try_into().unwrap()),
            i32::from_le_bytes(buf[BLK_Y].try_into().unwrap()),
            i32::from_le_bytes(buf[BLK_Z].try_into().unwrap()),
        );
        Ok(Self {
            length,
            flags,
            next: u64::from_le_bytes(buf[BLK_NEXT].try_into().unwrap()),
            tile_len: u32::from_le_bytes(buf[BLK_TILE_LEN].try_into().unwrap()),
            entry: TileEntry {
                coord,
                offset: u64::from_le_bytes(buf[BLK_OFFSET].try_into().unwrap()),
            },
        })
    }
}

/// Writes an index chain, keeping the latest block back until its successor is known.
pub struct BlockWriter<'a, W: FileIo + ?Sized> {
    io: &'a W,
    start: u64,
    offset: u64,
    generation: u64,
    in_holding: Option<IndexBlock>,
    written: u64,
}

impl<'a, W: FileIo + ?Sized> BlockWriter<'a, W> {
    /// Starts a chain for flush `generation` whose first block lands at `start`.
    pub fn new(io: &'a W, start: u64, generation: u64) -> Self {
        Self {
            io,
            start,
            offset: start,
            generation,
            in_holding: None,
            written: 0,
        }
    }

    /// Queues `block`, writing the previously held block with its `next` patched.
    ///
    /// Passing `None` terminates the chain.
    pub fn push(&mut self, block: Option<IndexBlock>) -> Result<()> {
        if let Some(mut held) = self.in_holding.take() {
            let next_allocation = self.offset + u64::from(held.length);
            held.next = if block.is_some() { next_allocation } else { 0 };
            let bytes = held.encode(self.offset, self.generation);
            if bytes.len() as u64 != next_allocation - self.offset {
                return Err(TesseraError::Fatal(
                    "index block length disagrees with its encoding",
                ));
            }
            self.io.write_at(self.offset, &bytes)?;
            debug!(
                offset = self.offset,
                next = held.next,
                coord = %held.entry.coord,
                "backend.index.block_written"
            );
            self.offset = next_allocation;
            self.written += 1;
        }
        self.in_holding = block;
        Ok(())
    }

    /// Terminates the chain and returns the number of blocks written.
    ///
    /// The written range is read back once and every link checked, so a
    /// chain that did not land where the writer put it is reported as
    /// [`TesseraError::Fatal`] before any header points at it.
    pub fn finish(mut self) -> Result<u64> {
        self.push(None)?;
        self.verify()?;
        Ok(self.written)
    }

    fn verify(&self) -> Result<()> {
        if self.written == 0 {
            return Ok(());
        }
        let mut buf = vec![0u8; (self.offset - self.start) as usize];
        match self.io.read_at(self.start, &mut buf) {
            Ok(()) => {}
            Err(TesseraError::Io(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(TesseraError::Fatal("index chain ends past the end of the file"));
            }
            Err(err) => return Err(err),
        }
        let mut at = self.start;
        for chunk in buf.chunks_exact(BLOCK_LEN) {
            let block = IndexBlock::decode(chunk, at, self.generation).map_err(|_| {
                TesseraError::Fatal("index chain on disk disagrees with blocks written")
            })?;
            let expected_next = if at + (BLOCK_LEN as u64) < self.offset {
                at + BLOCK_LEN as u64
            } else {
                0
            };
            if block.next != expected_next {
                return Err(TesseraError::Fatal("index chain write position drifted"));
            }
            at += BLOCK_LEN as u64;
        }
        Ok(())
    }
}

/// Entries recovered from an index chain.
#[derive(Debug, Default)]
pub struct ChainScan {
    /// Entries in chain order, first occurrence of each coordinate only.
    pub entries: Vec<TileEntry>,
    /// True when the walk stopped before reaching a terminating block.
    pub truncated: bool,
}

/// What a chain walk checks each block against.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ChainBounds {
    /// Tile size from the header geometry.
    pub tile_size: u64,
    /// Length of the swap file; every slot must end within it.
    pub file_len: u64,
    /// Flush generation recorded in the header.
    pub generation: u64,
}

/// Walks the chain starting at `start`, stopping quietly at the first unusable block.
///
/// A flush interrupted part-way can leave the last link pointing at bytes
/// that were never written; everything before that point is still returned.
pub fn read_index_chain<R: FileIo + ?Sized>(
    io: &R,
    start: u64,
    bounds: ChainBounds,
) -> ChainScan {
    let mut scan = ChainScan::default();
    let mut seen = CoordMap::<()>::default();
    let mut at = start;
    let mut buf = [0u8; BLOCK_LEN];
    while at != 0 {
        if let Err(err) = io.read_at(at, &mut buf) {
            warn!(offset = at, error = %err, "backend.index.read_stopped");
            scan.truncated = true;
            break;
        }
        let block = match IndexBlock::decode(&buf, at, bounds.generation) {
            Ok(block) => block,
            Err(err) => {
                warn!(offset = at, error = %err, "backend.index.read_stopped");
                scan.truncated = true;
                break;
            }
        };
        if let Err(reason) = check_slot(&block, &bounds) {
            warn!(offset = at, reason, "backend.index.read_stopped");
            scan.truncated = true;
            break;
        }
        if seen.insert(block.entry.coord, ()).is_none() {
            scan.entries.push(block.entry);
        } else {
            warn!(coord = %block.entry.coord, "backend.index.duplicate_entry");
        }
        if block.next != 0 && block.next <= at {
            warn!(offset = at, next = block.next, "backend.index.backward_link");
            scan.truncated = true;
            break;
        }
        at = block.next;
    }
    scan
}

fn check_slot(
    block: &IndexBlock,
    bounds: &ChainBounds,
) -> std::result::Result<(), &'static str> {
    let tile_size = bounds.tile_size;
    if u64::from(block.tile_len) != tile_size {
        return Err("tile length disagrees with header geometry");
    }
    let offset = block.entry.offset;
    if offset < HEADER_LEN as u64 || (offset - HEADER_LEN as u64) % tile_size != 0 {
        return Err("tile offset is not a slot boundary");
    }
    match offset.checked_add(tile_size) {
        Some(end) if end <= bounds.file_len => Ok(()),
        _ => Err("tile slot lies outside the swap file"),
    }
}
