#![forbid(unsafe_code)]

use std::{
    fs::File,
    io::{self, ErrorKind},
    path::Path,
    sync::Arc,
};

use tracing::trace;

use crate::types::{Result, TesseraError};

/// Consecutive zero-progress or interrupted attempts tolerated by one positioned transfer.
pub const MAX_IO_RETRIES: u32 = 8;

/// Trait for performing positioned file I/O operations.
pub trait FileIo: Send + Sync + 'static {
    /// Reads exactly `dst.len()` bytes at `off`.
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()>;
    /// Writes all of `src` at `off`.
    fn write_at(&self, off: u64, src: &[u8]) -> Result<()>;
    /// Synchronizes all file data and metadata to disk.
    fn sync_all(&self) -> Result<()>;
    /// Returns the current length of the file in bytes.
    fn len(&self) -> Result<u64>;
    /// Returns true if the file is empty.
    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
    /// Truncates or extends the file to the specified length.
    fn truncate(&self, len: u64) -> Result<()>;
}

#[cfg(unix)]
/// Unix positioned transfers built on `pread`/`pwrite`.
pub mod stdio_unix {
    use std::{fs::File, io, os::unix::fs::FileExt};

    /// Reads exact number of bytes at offset, retrying short reads a bounded number of times.
    pub fn read_exact(file: &File, off: u64, dst: &mut [u8]) -> io::Result<()> {
        super::transfer_exact(off, dst.len(), "read", |pos, done| {
            file.read_at(&mut dst[done..], pos)
        })
    }

    /// Writes all bytes at offset, retrying short writes a bounded number of times.
    pub fn write_all(file: &File, off: u64, src: &[u8]) -> io::Result<()> {
        super::transfer_exact(off, src.len(), "write", |pos, done| {
            file.write_at(&src[done..], pos)
        })
    }
}

#[cfg(windows)]
/// Windows positioned transfers built on `seek_read`/`seek_write`.
pub mod stdio_win {
    use std::{fs::File, io, os::windows::fs::FileExt};

    /// Reads exact number of bytes at offset, retrying short reads a bounded number of times.
    pub fn read_exact(file: &File, off: u64, dst: &mut [u8]) -> io::Result<()> {
        super::transfer_exact(off, dst.len(), "read", |pos, done| {
            file.seek_read(&mut dst[done..], pos)
        })
    }

    /// Writes all bytes at offset, retrying short writes a bounded number of times.
    pub fn write_all(file: &File, off: u64, src: &[u8]) -> io::Result<()> {
        super::transfer_exact(off, src.len(), "write", |pos, done| {
            file.seek_write(&src[done..], pos)
        })
    }
}

/// Drives a positioned transfer of `len` bytes to completion.
///
/// `step(pos, done)` moves bytes starting `done` bytes into the buffer at file
/// position `pos`. Partial progress accumulates; a run of [`MAX_IO_RETRIES`]
/// attempts without progress fails the whole transfer.
fn transfer_exact<F>(off: u64, len: usize, op: &'static str, mut step: F) -> io::Result<()>
where
    F: FnMut(u64, usize) -> io::Result<usize>,
{
    let mut done = 0usize;
    let mut stalls = 0u32;
    trace!(op, off, len, "io.transfer.start");
    while done < len {
        match step(off + done as u64, done) {
            Ok(0) => {
                stalls += 1;
                if stalls >= MAX_IO_RETRIES {
                    let kind = if op == "read" {
                        ErrorKind::UnexpectedEof
                    } else {
                        ErrorKind::WriteZero
                    };
                    return Err(io::Error::new(
                        kind,
                        format!("{op} stalled at offset {off} ({done}/{len} bytes)"),
                    ));
                }
            }
            Ok(n) => {
                stalls = 0;
                done += n;
            }
            Err(err) if err.kind() == ErrorKind::Interrupted => {
                stalls += 1;
                if stalls >= MAX_IO_RETRIES {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        }
    }
    trace!(op, off, len, "io.transfer.complete");
    Ok(())
}

/// Standard file I/O implementation using `Arc<File>`.
#[derive(Clone)]
pub struct StdFileIo {
    inner: Arc<File>,
}

impl StdFileIo {
    /// Creates a new StdFileIo from an existing File handle.
    pub fn new(file: File) -> Self {
        Self {
            inner: Arc::new(file),
        }
    }

    /// Opens or creates a file for read-write access without truncating it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(TesseraError::from)?;
        Ok(Self::new(file))
    }

    /// Creates a file for read-write access, discarding any previous contents.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(TesseraError::from)?;
        Ok(Self::new(file))
    }

    /// Opens an existing file read-only.
    pub fn open_read(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path).map_err(TesseraError::from)?;
        Ok(Self::new(file))
    }

    fn file(&self) -> &File {
        &self.inner
    }

    #[cfg(unix)]
    fn read_exact(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        stdio_unix::read_exact(self.file(), off, dst)
    }

    #[cfg(windows)]
    fn read_exact(&self, off: u64, dst: &mut [u8]) -> io::Result<()> {
        stdio_win::read_exact(self.file(), off, dst)
    }

    #[cfg(unix)]
    fn write_all(&self, off: u64, src: &[u8]) -> io::Result<()> {
        stdio_unix::write_all(self.file(), off, src)
    }

    #[cfg(windows)]
    fn write_all(&self, off: u64, src: &[u8]) -> io::Result<()> {
        stdio_win::write_all(self.file(), off, src)
    }

    #[cfg(not(any(unix, windows)))]
    fn read_exact(&self, _off: u64, _dst: &mut [u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }

    #[cfg(not(any(unix, windows)))]
    fn write_all(&self, _off: u64, _src: &[u8]) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "StdFileIo unsupported on this platform",
        ))
    }
}

impl FileIo for StdFileIo {
    fn read_at(&self, off: u64, dst: &mut [u8]) -> Result<()> {
        self.read_exact(off, dst).map_err(TesseraError::from)
    }

    fn write_at(&self, off: u64, src: &[u8]) -> Result<()> {
        self.write_all(off, src).map_err(TesseraError::from)
    }

    fn sync_all(&self) -> Result<()> {
        trace!("io.sync_all.start");
        let result = self.file().sync_all().map_err(TesseraError::from);
        match &result {
            Ok(()) => trace!("io.sync_all.complete"),
            Err(err) => trace!(error = %err, "io.sync_all.error"),
        }
        result
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file().metadata().map_err(TesseraError::from)?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.file().set_len(len).map_err(TesseraError::from)
    }
}
