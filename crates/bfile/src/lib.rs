//! # BFile -- Buffered Append File
//!
//! An append-oriented file with a fixed-size in-memory write buffer and
//! byte-addressable random reads. Appends land in the buffer and are flushed
//! to disk a buffer at a time; reads observe the buffered tail as if it were
//! already on disk.
//!
//! ## Layout terms
//!
//! ```text
//!                on disk                      in memory
//! ┌──────────────────────────────────┬─────────────────────┐
//! │ flushed bytes                    │ write buffer        │
//! └──────────────────────────────────┴─────────────────────┘
//! 0                               EOD            EOD + buffered
//! ```
//!
//! *EOD* (end of data) is the on-disk file size. `logical_size()` is
//! `EOD + buffered` -- the size the file will have after the next flush.
//! `read_at` serves any range up to `logical_size()`; ranges past it fail
//! with [`BFileError::EndOfData`].
//!
//! ## Failure semantics
//!
//! An I/O error poisons the BFile: the handle is dropped and every
//! subsequent operation fails with [`BFileError::Poisoned`] until [`open`]
//! succeeds again. The write buffer is not recovered across a poisoning.
//!
//! [`open`]: BFile::open

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Default size of the in-memory write buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Errors from BFile operations.
#[derive(Debug, Error)]
pub enum BFileError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A read past the logical end of the file.
    #[error("read past end of data: logical size {logical_size}, attempted {attempted}")]
    EndOfData { logical_size: u64, attempted: u64 },

    /// A previous I/O error poisoned this file; it must be reopened.
    #[error("bfile poisoned by a previous I/O error; reopen required")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, BFileError>;

/// Opens `path` read/write into `slot` if no handle is held, and returns
/// the handle. Borrows only the slot so callers can keep using their other
/// fields.
fn open_handle<'a>(slot: &'a mut Option<File>, path: &Path) -> io::Result<&'a mut File> {
    if slot.is_none() {
        *slot = Some(OpenOptions::new().read(true).write(true).open(path)?);
    }
    match slot.as_mut() {
        Some(file) => Ok(file),
        None => unreachable!("handle was just installed"),
    }
}

/// A buffered append file.
pub struct BFile {
    /// Open handle; `None` after `close` or a poisoning error.
    file: Option<File>,
    path: PathBuf,
    /// Buffered tail bytes awaiting a flush. `buffer.len() <= buffer_size`.
    buffer: Vec<u8>,
    buffer_size: usize,
    /// On-disk size; everything below this offset is durable on flush.
    eod: u64,
    poisoned: bool,
}

impl BFile {
    /// Creates a new BFile at `path`, truncating any existing file.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::create_with_buffer(path, DEFAULT_BUFFER_SIZE)
    }

    /// Creates a new BFile with a caller-chosen write buffer size.
    pub fn create_with_buffer<P: AsRef<Path>>(path: P, buffer_size: usize) -> Result<Self> {
        assert!(buffer_size > 0, "buffer size must be positive");
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file: Some(file),
            path,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            eod: 0,
            poisoned: false,
        })
    }

    /// Opens an existing BFile; `eod` is taken from the on-disk size.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_path_with_buffer(path, DEFAULT_BUFFER_SIZE)
    }

    /// Opens an existing BFile with a caller-chosen write buffer size.
    pub fn open_path_with_buffer<P: AsRef<Path>>(path: P, buffer_size: usize) -> Result<Self> {
        assert!(buffer_size > 0, "buffer size must be positive");
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let eod = file.metadata()?.len();
        Ok(Self {
            file: Some(file),
            path,
            buffer: Vec::with_capacity(buffer_size),
            buffer_size,
            eod,
            poisoned: false,
        })
    }

    /// Reacquires the file handle after [`close`](BFile::close) (idempotent)
    /// and clears any poisoning. `eod` is refreshed from the on-disk size.
    pub fn open(&mut self) -> Result<()> {
        if self.file.is_some() && !self.poisoned {
            return Ok(());
        }
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.eod = file.metadata()?.len();
        self.file = Some(file);
        self.buffer.clear();
        self.poisoned = false;
        Ok(())
    }

    /// Path this BFile reads and writes.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// On-disk size, not counting the buffered tail.
    pub fn eod(&self) -> u64 {
        self.eod
    }

    /// Total readable size: on-disk bytes plus the buffered tail.
    pub fn logical_size(&self) -> u64 {
        self.eod + self.buffer.len() as u64
    }

    /// Appends `data`, flushing the buffer to disk as many times as needed.
    ///
    /// Returns `true` iff at least one flush happened, which callers use to
    /// count buffer cycles.
    pub fn write(&mut self, mut data: &[u8]) -> Result<bool> {
        self.check_poisoned()?;
        let mut flushed = false;
        loop {
            let space = self.buffer_size - self.buffer.len();
            if data.len() <= space {
                self.buffer.extend_from_slice(data);
                return Ok(flushed);
            }
            self.buffer.extend_from_slice(&data[..space]);
            data = &data[space..];
            self.flush()?;
            flushed = true;
        }
    }

    /// Overwrites bytes at `offset`, bypassing the append buffer.
    ///
    /// The buffer is flushed first so the write cannot clash with buffered
    /// bytes. Writing past the current end advances `eod`.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.flush()?;
        let outcome: io::Result<()> = (|| {
            let file = open_handle(&mut self.file, &self.path)?;
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(data)?;
            Ok(())
        })();
        if let Err(e) = outcome {
            self.poison();
            return Err(e.into());
        }
        self.eod = self.eod.max(offset + data.len() as u64);
        Ok(())
    }

    /// Reads `out.len()` bytes starting at `offset`, observing both the
    /// on-disk bytes and the buffered tail.
    pub fn read_at(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        self.check_poisoned()?;
        let end = offset + out.len() as u64;

        if end > self.logical_size() {
            return Err(BFileError::EndOfData {
                logical_size: self.logical_size(),
                attempted: end,
            });
        }

        if offset >= self.eod {
            // Entirely within the buffered tail.
            let start = (offset - self.eod) as usize;
            out.copy_from_slice(&self.buffer[start..start + out.len()]);
            return Ok(());
        }

        if end <= self.eod {
            return self.read_disk(offset, out);
        }

        // Straddles EOD: disk prefix, buffer suffix.
        let disk_len = (self.eod - offset) as usize;
        let (disk_part, buffer_part) = out.split_at_mut(disk_len);
        self.read_disk(offset, disk_part)?;
        buffer_part.copy_from_slice(&self.buffer[..buffer_part.len()]);
        Ok(())
    }

    /// Writes the buffered tail to disk at `eod` and clears the buffer.
    pub fn flush(&mut self) -> Result<()> {
        self.check_poisoned()?;
        if self.buffer.is_empty() {
            return Ok(());
        }
        let outcome: io::Result<()> = (|| {
            let file = open_handle(&mut self.file, &self.path)?;
            file.seek(SeekFrom::Start(self.eod))?;
            file.write_all(&self.buffer)?;
            Ok(())
        })();
        if let Err(e) = outcome {
            self.poison();
            return Err(e.into());
        }
        self.eod += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Flushes and releases the file handle. A closed BFile can be reopened
    /// with [`open`](BFile::open).
    pub fn close(&mut self) -> Result<()> {
        self.flush()?;
        self.file = None;
        Ok(())
    }

    fn read_disk(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        let outcome: io::Result<()> = (|| {
            let file = open_handle(&mut self.file, &self.path)?;
            file.seek(SeekFrom::Start(offset))?;
            file.read_exact(out)?;
            Ok(())
        })();
        if let Err(e) = outcome {
            self.poison();
            return Err(e.into());
        }
        Ok(())
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(BFileError::Poisoned);
        }
        Ok(())
    }

    fn poison(&mut self) {
        self.poisoned = true;
        self.file = None;
    }
}

impl std::fmt::Debug for BFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BFile")
            .field("path", &self.path)
            .field("eod", &self.eod)
            .field("buffered", &self.buffer.len())
            .field("buffer_size", &self.buffer_size)
            .field("open", &self.file.is_some())
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
