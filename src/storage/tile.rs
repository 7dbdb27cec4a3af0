/// A tile payload: an owned, fixed-length pixel buffer plus revision tracking.
///
/// `rev` is bumped on every mutable access to the bytes; `stored_rev` records
/// the revision that last reached a backend. A tile is stored when the two
/// match.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tile {
    data: Box<[u8]>,
    rev: u64,
    stored_rev: u64,
}

impl Tile {
    /// Creates a zero-filled tile that has not been stored anywhere.
    pub fn new(size: usize) -> Self {
        Self::filled(size, 0)
    }

    /// Creates a tile with every byte set to `byte`.
    pub fn filled(size: usize, byte: u8) -> Self {
        Self::from_bytes(vec![byte; size])
    }

    /// Wraps caller-provided bytes as an unstored tile.
    pub fn from_bytes(data: impl Into<Box<[u8]>>) -> Self {
        Self {
            data: data.into(),
            rev: 1,
            stored_rev: 0,
        }
    }

    /// Wraps bytes that were just read from a backend.
    pub(crate) fn loaded(data: Vec<u8>) -> Self {
        Self {
            data: data.into_boxed_slice(),
            rev: 1,
            stored_rev: 1,
        }
    }

    /// Read access to the pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Write access to the pixel bytes; marks the tile modified.
    pub fn data_mut(&mut self) -> &mut [u8] {
        self.rev += 1;
        &mut self.data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current revision.
    pub fn rev(&self) -> u64 {
        self.rev
    }

    /// Revision last written to a backend.
    pub fn stored_rev(&self) -> u64 {
        self.stored_rev
    }

    /// True when the current revision has been written to a backend.
    pub fn is_stored(&self) -> bool {
        self.rev == self.stored_rev
    }

    /// Records the current revision as written.
    pub fn mark_stored(&mut self) {
        self.stored_rev = self.rev;
    }

    /// Forces the tile to count as modified.
    pub fn mark_dirty(&mut self) {
        self.rev += 1;
    }

    /// Consumes the tile, returning its bytes.
    pub fn into_bytes(self) -> Box<[u8]> {
        self.data
    }
}
