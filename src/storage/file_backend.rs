use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::primitives::io::{FileIo, StdFileIo};
use crate::storage::format::PixelFormat;
use crate::storage::freelist::SlotAllocator;
use crate::storage::header::{SwapHeader, HEADER_LEN};
use crate::storage::index::{read_index_chain, BlockWriter, ChainBounds, IndexBlock, TileIndex};
use crate::storage::source::TileSource;
use crate::storage::tile::Tile;
use crate::types::{Result, TesseraError, TileCoord};

/// Default tile width in pixels.
pub const DEFAULT_TILE_WIDTH: u32 = 128;
/// Default tile height in pixels.
pub const DEFAULT_TILE_HEIGHT: u32 = 64;

/// Configuration supplied when opening a [`FileBackend`].
///
/// Geometry and format only apply to a new swap file; an existing file
/// supplies its own from the header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileBackendOptions {
    /// Tile width in pixels.
    pub tile_width: u32,
    /// Tile height in pixels.
    pub tile_height: u32,
    /// Pixel format of every tile.
    pub format: PixelFormat,
    /// Whether flush ends with an fsync of the swap file.
    pub sync_on_flush: bool,
}

impl Default for FileBackendOptions {
    fn default() -> Self {
        Self {
            tile_width: DEFAULT_TILE_WIDTH,
            tile_height: DEFAULT_TILE_HEIGHT,
            format: PixelFormat::default(),
            sync_on_flush: true,
        }
    }
}

impl FileBackendOptions {
    /// Sets the tile dimensions.
    pub fn tile_dimensions(mut self, width: u32, height: u32) -> Self {
        self.tile_width = width;
        self.tile_height = height;
        self
    }

    /// Sets the pixel format.
    pub fn format(mut self, format: PixelFormat) -> Self {
        self.format = format;
        self
    }

    /// Enables or disables the fsync at the end of every flush.
    pub fn sync_on_flush(mut self, enabled: bool) -> Self {
        self.sync_on_flush = enabled;
        self
    }

    /// Bytes per tile implied by these options.
    pub fn tile_size(&self) -> usize {
        self.tile_width as usize * self.tile_height as usize * self.format.bytes_per_pixel() as usize
    }
}

/// Allocation and traffic counters of one backend.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Tiles currently indexed.
    pub live_tiles: u64,
    /// Bytes held by indexed tiles.
    pub live_bytes: u64,
    /// Highest `live_tiles` seen.
    pub peak_tiles: u64,
    /// Highest `live_bytes` seen.
    pub peak_bytes: u64,
    /// Reclaimed slots awaiting reuse.
    pub free_slots: u64,
    /// Next fresh slot offset.
    pub frontier: u64,
    /// Logical swap file length.
    pub total_bytes: u64,
    /// Tile reads served from disk.
    pub reads: u64,
    /// Tile writes issued to disk.
    pub writes: u64,
    /// Completed flushes.
    pub flushes: u64,
    /// File extensions performed by the allocator.
    pub grows: u64,
}

impl fmt::Display for BackendStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "live={} ({} bytes) peak={} ({} bytes) free_slots={} frontier={} total={} reads={} writes={} flushes={} grows={}",
            self.live_tiles,
            self.live_bytes,
            self.peak_tiles,
            self.peak_bytes,
            self.free_slots,
            self.frontier,
            self.total_bytes,
            self.reads,
            self.writes,
            self.flushes,
            self.grows,
        )
    }
}

#[derive(Default)]
struct Counters {
    live_tiles: u64,
    peak_tiles: u64,
    reads: u64,
    writes: u64,
    flushes: u64,
    grows: u64,
}

impl Counters {
    fn on_alloc(&mut self) {
        self.live_tiles += 1;
        self.peak_tiles = self.peak_tiles.max(self.live_tiles);
    }

    fn on_dealloc(&mut self) {
        self.live_tiles = self.live_tiles.saturating_sub(1);
    }
}

struct SwapHandles {
    read: Arc<dyn FileIo>,
    write: Arc<dyn FileIo>,
}

/// Tile storage backed by a private swap file.
///
/// The file is created on first use and deleted when the backend is dropped.
/// Callers serialise access; every mutating operation takes `&mut self`.
pub struct FileBackend {
    path: PathBuf,
    header: SwapHeader,
    tile_size: usize,
    handles: Option<SwapHandles>,
    index: TileIndex,
    allocator: SlotAllocator,
    counters: Counters,
    sync_on_flush: bool,
    poisoned: Option<&'static str>,
}

impl FileBackend {
    /// Opens the swap file at `path`, loading it if it already exists.
    ///
    /// A missing file is not created until a tile is stored or the backend
    /// is flushed.
    pub fn open(path: impl AsRef<Path>, options: FileBackendOptions) -> Result<Self> {
        let mut backend = Self::unopened(path.as_ref(), options)?;
        if backend.path.exists() {
            let write: Arc<dyn FileIo> = Arc::new(StdFileIo::open(&backend.path)?);
            let read: Arc<dyn FileIo> = Arc::new(StdFileIo::open_read(&backend.path)?);
            backend.load(read, write)?;
        } else {
            debug!(path = %backend.path.display(), "backend.open.deferred");
        }
        Ok(backend)
    }

    /// Opens a backend over an already-open handle to the swap file at `path`.
    ///
    /// The handle serves both reads and writes. An empty file is initialised
    /// with a fresh header; anything else is loaded like [`FileBackend::open`]
    /// does. The file at `path` is removed on drop as usual.
    pub fn with_io(
        path: impl AsRef<Path>,
        options: FileBackendOptions,
        io: Arc<dyn FileIo>,
    ) -> Result<Self> {
        let mut backend = Self::unopened(path.as_ref(), options)?;
        if io.is_empty()? {
            backend.initialise(io.clone(), io)?;
        } else {
            backend.load(io.clone(), io)?;
        }
        Ok(backend)
    }

    fn unopened(path: &Path, options: FileBackendOptions) -> Result<Self> {
        let header = SwapHeader::new(options.tile_width, options.tile_height, options.format)?;
        let tile_size = header.tile_size();
        Ok(Self {
            path: path.to_path_buf(),
            header,
            tile_size,
            handles: None,
            index: TileIndex::new(),
            allocator: SlotAllocator::new(tile_size as u64),
            counters: Counters::default(),
            sync_on_flush: options.sync_on_flush,
            poisoned: None,
        })
    }

    fn load(&mut self, read: Arc<dyn FileIo>, write: Arc<dyn FileIo>) -> Result<()> {
        let mut buf = [0u8; HEADER_LEN];
        read.read_at(0, &mut buf).map_err(|err| match err {
            TesseraError::Io(io) if io.kind() == std::io::ErrorKind::UnexpectedEof => {
                TesseraError::Corruption("swap header truncated")
            }
            other => other,
        })?;
        let header = SwapHeader::decode(&buf)?;
        if header.tile_size() != self.tile_size || header.format != self.header.format {
            debug!(
                path = %self.path.display(),
                tile_width = header.tile_width,
                tile_height = header.tile_height,
                format = %header.format,
                "backend.open.geometry_from_header"
            );
        }
        self.tile_size = header.tile_size();
        let bounds = ChainBounds {
            tile_size: self.tile_size as u64,
            file_len: read.len()?,
            generation: header.generation,
        };
        let scan = read_index_chain(read.as_ref(), header.next, bounds);
        if !scan.truncated && scan.entries.len() as u64 != header.entry_count {
            warn!(
                expected = header.entry_count,
                found = scan.entries.len(),
                "backend.open.entry_count_mismatch"
            );
        }
        for entry in &scan.entries {
            self.index.insert(entry.coord, entry.offset);
            self.counters.on_alloc();
        }
        self.allocator =
            SlotAllocator::restore(self.tile_size as u64, scan.entries.iter().map(|e| e.offset));
        self.header = header;
        self.handles = Some(SwapHandles { read, write });
        info!(
            path = %self.path.display(),
            entries = self.index.len(),
            truncated = scan.truncated,
            generation = self.header.generation,
            frontier = self.allocator.frontier(),
            reclaimed = self.allocator.free_slots(),
            "backend.open.loaded"
        );
        Ok(())
    }

    fn check_poisoned(&self) -> Result<()> {
        match self.poisoned {
            Some(reason) => Err(TesseraError::Fatal(reason)),
            None => Ok(()),
        }
    }

    fn poison(&mut self, reason: &'static str, cause: &TesseraError) -> TesseraError {
        error!(
            path = %self.path.display(),
            reason,
            error = %cause,
            "backend.fatal"
        );
        self.poisoned = Some(reason);
        TesseraError::Fatal(reason)
    }

    fn ensure_exist(&mut self) -> Result<()> {
        self.check_poisoned()?;
        if self.handles.is_some() {
            return Ok(());
        }
        debug!(path = %self.path.display(), "backend.swap.create");
        let write: Arc<dyn FileIo> = Arc::new(StdFileIo::create(&self.path)?);
        let read: Arc<dyn FileIo> = Arc::new(StdFileIo::open_read(&self.path)?);
        self.initialise(read, write)
    }

    fn initialise(&mut self, read: Arc<dyn FileIo>, write: Arc<dyn FileIo>) -> Result<()> {
        write.truncate(HEADER_LEN as u64)?;
        self.header.next = 0;
        self.header.entry_count = 0;
        write.write_at(0, &self.header.encode())?;
        write.sync_all()?;
        self.allocator = SlotAllocator::new(self.tile_size as u64);
        self.handles = Some(SwapHandles { read, write });
        Ok(())
    }

    fn handles(&self) -> Result<&SwapHandles> {
        self.handles
            .as_ref()
            .ok_or(TesseraError::Invalid("swap file has not been created"))
    }

    fn allocate_slot(&mut self) -> Result<u64> {
        let grant = self.allocator.allocate();
        if let Some(len) = grant.grow_to {
            debug!(bytes = len, "backend.swap.grow");
            if let Err(err) = self.handles()?.write.truncate(len) {
                return Err(self.poison("failed to grow swap file", &err));
            }
            self.counters.grows += 1;
        }
        self.counters.on_alloc();
        Ok(grant.offset)
    }

    /// Reads the tile at `coord`; `Ok(None)` when it has no entry.
    pub fn get_tile(&mut self, coord: TileCoord) -> Result<Option<Tile>> {
        let Some(offset) = self.index.get(coord) else {
            return Ok(None);
        };
        self.ensure_exist()?;
        let mut data = vec![0u8; self.tile_size];
        if let Err(err) = self.handles()?.read.read_at(offset, &mut data) {
            warn!(coord = %coord, offset, error = %err, "backend.read.failed");
            return Err(err);
        }
        self.counters.reads += 1;
        debug!(coord = %coord, offset, "backend.read");
        Ok(Some(Tile::loaded(data)))
    }

    /// Writes `tile` at `coord`, allocating a slot on first store.
    pub fn set_tile(&mut self, coord: TileCoord, tile: &mut Tile) -> Result<()> {
        if tile.len() != self.tile_size {
            return Err(TesseraError::Invalid(
                "tile payload size does not match backend tile size",
            ));
        }
        self.ensure_exist()?;
        let (offset, fresh) = match self.index.get(coord) {
            Some(offset) => (offset, false),
            None => {
                let offset = self.allocate_slot()?;
                self.index.insert(coord, offset);
                debug!(coord = %coord, offset, "backend.entry.new");
                (offset, true)
            }
        };
        if let Err(err) = self.handles()?.write.write_at(offset, tile.data()) {
            warn!(coord = %coord, offset, error = %err, "backend.write.failed");
            if fresh {
                self.index.remove(coord);
                self.allocator.release(offset);
                self.counters.on_dealloc();
            }
            return Err(err);
        }
        self.counters.writes += 1;
        tile.mark_stored();
        debug!(coord = %coord, offset, "backend.write");
        Ok(())
    }

    /// Forgets the tile at `coord` and reclaims its slot. The slot's bytes are not cleared.
    pub fn void_tile(&mut self, coord: TileCoord) -> bool {
        match self.index.remove(coord) {
            Some(offset) => {
                self.allocator.release(offset);
                self.counters.on_dealloc();
                debug!(coord = %coord, offset, "backend.entry.void");
                true
            }
            None => false,
        }
    }

    /// Whether an entry exists for `coord`. Never touches the disk.
    pub fn tile_exists(&self, coord: TileCoord) -> bool {
        self.index.contains(coord)
    }

    /// Writes the whole index and the header so the file can be reopened.
    ///
    /// Every flush runs under a new generation. Blocks left at the same
    /// offsets by an earlier flush no longer verify, so a flush cut short
    /// before its header lands cannot bring back entries voided since.
    pub fn flush(&mut self) -> Result<()> {
        self.ensure_exist()?;
        self.header.generation = self.header.generation.wrapping_add(1);
        debug!(
            path = %self.path.display(),
            entries = self.index.len(),
            generation = self.header.generation,
            "backend.flush.start"
        );
        let start = self.allocator.frontier();
        let written = match self.write_index(start) {
            Ok(written) => written,
            Err(TesseraError::Fatal(reason)) => {
                let err = TesseraError::Fatal(reason);
                return Err(self.poison(reason, &err));
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "backend.flush.index_failed");
                return Err(err);
            }
        };
        self.header.next = if written == 0 { 0 } else { start };
        self.header.entry_count = written;
        if let Err(err) = self.write_header() {
            warn!(path = %self.path.display(), error = %err, "backend.flush.header_failed");
            return Err(err);
        }
        self.counters.flushes += 1;
        debug!(
            path = %self.path.display(),
            next = self.header.next,
            entries = written,
            "backend.flush.complete"
        );
        Ok(())
    }

    fn write_index(&self, start: u64) -> Result<u64> {
        let handles = self.handles()?;
        if self.index.is_empty() {
            return Ok(0);
        }
        let tile_len = self.tile_size as u32;
        let mut writer = BlockWriter::new(handles.write.as_ref(), start, self.header.generation);
        for entry in self.index.iter() {
            writer.push(Some(IndexBlock::for_entry(entry, tile_len)))?;
        }
        let written = writer.finish()?;
        if self.sync_on_flush {
            handles.write.sync_all()?;
        }
        Ok(written)
    }

    fn write_header(&self) -> Result<()> {
        let handles = self.handles()?;
        handles.write.write_at(0, &self.header.encode())?;
        if self.sync_on_flush {
            handles.write.sync_all()?;
        }
        Ok(())
    }

    /// Reserved hook for background persistence; does nothing.
    pub fn idle(&mut self) -> Option<()> {
        None
    }

    /// Swap file location.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes per tile.
    pub fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Tile width in pixels.
    pub fn tile_width(&self) -> u32 {
        self.header.tile_width
    }

    /// Tile height in pixels.
    pub fn tile_height(&self) -> u32 {
        self.header.tile_height
    }

    /// Pixel format of the stored tiles.
    pub fn format(&self) -> &PixelFormat {
        &self.header.format
    }

    /// Header as last written or loaded.
    pub fn header(&self) -> &SwapHeader {
        &self.header
    }

    /// Slot offset of the tile at `coord`.
    pub fn entry_offset(&self, coord: TileCoord) -> Option<u64> {
        self.index.get(coord)
    }

    /// Coordinates of every stored tile, in no particular order.
    pub fn coords(&self) -> impl Iterator<Item = TileCoord> + '_ {
        self.index.iter().map(|entry| entry.coord)
    }

    /// Number of stored tiles.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// True when no tiles are stored.
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Whether the swap file has been created or opened.
    pub fn is_created(&self) -> bool {
        self.handles.is_some()
    }

    /// Snapshot of the allocation and traffic counters.
    pub fn stats(&self) -> BackendStats {
        let tile_size = self.tile_size as u64;
        let counters = &self.counters;
        BackendStats {
            live_tiles: counters.live_tiles,
            live_bytes: counters.live_tiles * tile_size,
            peak_tiles: counters.peak_tiles,
            peak_bytes: counters.peak_tiles * tile_size,
            free_slots: self.allocator.free_slots() as u64,
            frontier: self.allocator.frontier(),
            total_bytes: self.allocator.total(),
            reads: counters.reads,
            writes: counters.writes,
            flushes: counters.flushes,
            grows: counters.grows,
        }
    }
}

impl TileSource for FileBackend {
    fn tile_size(&self) -> usize {
        self.tile_size
    }

    fn get_tile(&mut self, coord: TileCoord) -> Result<Option<Tile>> {
        FileBackend::get_tile(self, coord)
    }

    fn set_tile(&mut self, coord: TileCoord, tile: &mut Tile) -> Result<()> {
        FileBackend::set_tile(self, coord, tile)
    }

    fn void_tile(&mut self, coord: TileCoord) -> Result<bool> {
        Ok(FileBackend::void_tile(self, coord))
    }

    fn tile_exists(&self, coord: TileCoord) -> bool {
        FileBackend::tile_exists(self, coord)
    }

    fn flush(&mut self) -> Result<()> {
        FileBackend::flush(self)
    }

    fn idle(&mut self) -> Result<bool> {
        Ok(FileBackend::idle(self).is_some())
    }
}

impl Drop for FileBackend {
    fn drop(&mut self) {
        let Some(handles) = self.handles.take() else {
            return;
        };
        drop(handles);
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "backend.swap.removed"),
            Err(err) => warn!(path = %self.path.display(), error = %err, "backend.swap.remove_failed"),
        }
    }
}
