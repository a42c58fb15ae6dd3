//! # HFile -- History / Spill-Over Index
//!
//! A large bin-partitioned key index holding the records spilled out of a
//! [`KFile`](crate::KFile). Unlike the key file, the history file has no
//! in-memory cache and no write buffer; batches of pre-sorted records are
//! merged into per-bin regions in place.
//!
//! ## Layout
//!
//! ```text
//! [offsets_count: u32 BE]
//! [KeySet × offsets_count: start u64 BE ‖ end u64 BE]
//! [bin regions, in the order they were last written]
//! ```
//!
//! Each KeySet records the byte range `[start, end)` currently holding its
//! bin's 48-byte records. Regions are not laid out in bin order: when a bin
//! outgrows the space before its neighbor, its whole region is relocated to
//! the first gap large enough (or the end of the file), leaving a hole a
//! later relocation can reuse. Two views are maintained: `key_sets` in bin
//! order for lookups, and an end-offset-sorted view for walking free space.
//!
//! ## Invariants
//!
//! - After `add_keys` returns, every pre-existing key still resolves.
//! - KeySet regions never overlap.
//! - The header is rewritten only after all region data is on disk.

use std::path::Path;

use bfile::BFile;
use tracing::{debug, trace};

use crate::header::bin_index;
use crate::{Address, DBBKey, KeyFileError, Result, RECORD_SIZE};

/// Name of the history file within a key file directory.
pub(crate) const HISTORY_FILENAME: &str = "history.dat";

/// Upper bound on the number of bins a history file may be created with.
pub const MAX_OFFSETS_COUNT: u32 = 102_400;

/// Marshaled size of one KeySet entry.
const KEY_SET_SIZE: usize = 16;

/// Chunk size for streaming key walks, aligned to whole records.
const WALK_CHUNK: usize = RECORD_SIZE * 21_845; // ~1 MiB

/// The byte range `[start, end)` of one bin's records. Empty when
/// `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct KeySet {
    start: u64,
    end: u64,
}

impl KeySet {
    fn len(&self) -> u64 {
        self.end - self.start
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// The history index over a single `history.dat`.
pub struct HFile {
    file: BFile,
    offsets_count: u32,
    header_size: u64,
    /// KeySets in bin order (lookup view).
    key_sets: Vec<KeySet>,
    /// Indices into `key_sets`, ascending by region end (free-space view).
    /// Sorted by end rather than start because empty KeySets share their
    /// start with whichever region last vacated that spot.
    by_offset: Vec<usize>,
    /// Reusable buffer for region reads and relocations.
    scratch: Vec<u8>,
}

impl HFile {
    /// Creates a fresh, empty history file in `directory`, replacing any
    /// existing one.
    pub fn create<P: AsRef<Path>>(directory: P, offsets_count: u32) -> Result<Self> {
        if offsets_count == 0 || offsets_count > MAX_OFFSETS_COUNT {
            return Err(KeyFileError::BadArgument(format!(
                "history offsets_count must be in 1..={MAX_OFFSETS_COUNT}, got {offsets_count}"
            )));
        }
        let file = BFile::create(directory.as_ref().join(HISTORY_FILENAME))?;
        let header_size = 4 + (KEY_SET_SIZE as u64) * offsets_count as u64;
        // Initializing every KeySet as empty at the end of the header leaves
        // no special case for bins that have never been written.
        let key_sets = vec![
            KeySet {
                start: header_size,
                end: header_size,
            };
            offsets_count as usize
        ];
        let mut hf = Self {
            file,
            offsets_count,
            header_size,
            key_sets,
            by_offset: (0..offsets_count as usize).collect(),
            scratch: Vec::new(),
        };
        hf.write_header()?;
        Ok(hf)
    }

    /// Opens an existing history file in `directory`.
    pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let mut file = BFile::open_path(directory.as_ref().join(HISTORY_FILENAME))?;

        let mut count_buf = [0u8; 4];
        file.read_at(0, &mut count_buf)?;
        let offsets_count = u32::from_be_bytes(count_buf);
        if offsets_count == 0 || offsets_count > MAX_OFFSETS_COUNT {
            return Err(KeyFileError::Corrupt(format!(
                "history file has impossible bin count {offsets_count}"
            )));
        }

        let header_size = 4 + (KEY_SET_SIZE as u64) * offsets_count as u64;
        let mut table = vec![0u8; (header_size - 4) as usize];
        file.read_at(4, &mut table)?;

        let size = file.logical_size();
        let mut key_sets = Vec::with_capacity(offsets_count as usize);
        for entry in table.chunks_exact(KEY_SET_SIZE) {
            let start = u64::from_be_bytes(entry[..8].try_into().expect("8-byte field"));
            let end = u64::from_be_bytes(entry[8..].try_into().expect("8-byte field"));
            if start > end || start < header_size || end > size {
                return Err(KeyFileError::Corrupt(format!(
                    "history KeySet [{start}, {end}) outside file of {size} bytes"
                )));
            }
            if (end - start) % RECORD_SIZE as u64 != 0 {
                return Err(KeyFileError::Corrupt(format!(
                    "history KeySet [{start}, {end}) is not whole records"
                )));
            }
            key_sets.push(KeySet { start, end });
        }

        let mut hf = Self {
            file,
            offsets_count,
            header_size,
            key_sets,
            by_offset: (0..offsets_count as usize).collect(),
            scratch: Vec::new(),
        };
        hf.offset_sort();
        Ok(hf)
    }

    /// Whether `directory` contains a history file.
    pub fn exists<P: AsRef<Path>>(directory: P) -> bool {
        directory.as_ref().join(HISTORY_FILENAME).exists()
    }

    /// Number of bins.
    pub fn offsets_count(&self) -> u32 {
        self.offsets_count
    }

    /// Offset just past the last region (the end of useful data).
    pub fn end_of_file(&self) -> u64 {
        self.by_offset
            .last()
            .map(|&i| self.key_sets[i].end)
            .unwrap_or(self.header_size)
    }

    /// Merges a batch of 48-byte records into the index.
    ///
    /// `buffer` must be a concatenation of records sorted ascending by bin
    /// index; a length that is not a multiple of 48 or a descending bin
    /// sequence is rejected with `BadArgument`. The header is persisted once
    /// after all region writes succeed, so every pre-existing key remains
    /// resolvable.
    pub fn add_keys(&mut self, buffer: &[u8]) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        if buffer.len() % RECORD_SIZE != 0 {
            return Err(KeyFileError::BadArgument(format!(
                "key buffer of {} bytes is not whole records",
                buffer.len()
            )));
        }
        // Validate ordering before touching any region, so a bad batch
        // cannot leave some bins updated and others not.
        let mut previous = self.record_bin(buffer);
        for at in (RECORD_SIZE..buffer.len()).step_by(RECORD_SIZE) {
            let bin = self.record_bin(&buffer[at..]);
            if bin < previous {
                return Err(KeyFileError::BadArgument(
                    "key buffer is not sorted by bin".into(),
                ));
            }
            previous = bin;
        }

        debug!(
            records = buffer.len() / RECORD_SIZE,
            "merging batch into history"
        );

        let mut run_start = 0usize;
        let mut run_bin = self.record_bin(buffer);
        let mut at = RECORD_SIZE;
        while at < buffer.len() {
            let bin = self.record_bin(&buffer[at..]);
            if bin != run_bin {
                self.update_key_set(run_bin, &buffer[run_start..at])?;
                run_bin = bin;
                run_start = at;
            }
            at += RECORD_SIZE;
        }
        self.update_key_set(run_bin, &buffer[run_start..])?;

        self.write_header()
    }

    /// Looks up `key` in its bin, returning the descriptor if present.
    pub fn get(&mut self, key: &Address) -> Result<Option<DBBKey>> {
        let ks = self.key_sets[bin_index(key, self.offsets_count)];
        if ks.is_empty() {
            return Ok(None);
        }

        let len = ks.len() as usize;
        if self.scratch.len() < len {
            self.scratch.resize(len, 0);
        }
        self.file.read_at(ks.start, &mut self.scratch[..len])?;

        for record in self.scratch[..len].chunks_exact(RECORD_SIZE) {
            if &record[..32] == key {
                let (_, dbbkey) = DBBKey::parse(record)?;
                return Ok(Some(dbbkey));
            }
        }
        Ok(None)
    }

    /// Streams every stored address through `visit`, one bin at a time in
    /// record-aligned chunks. Used to rebuild bloom filters on open.
    pub fn for_each_key<F: FnMut(&Address)>(&mut self, mut visit: F) -> Result<()> {
        for i in 0..self.key_sets.len() {
            let ks = self.key_sets[i];
            let mut at = ks.start;
            while at < ks.end {
                let len = ((ks.end - at) as usize).min(WALK_CHUNK);
                if self.scratch.len() < len {
                    self.scratch.resize(len, 0);
                }
                self.file.read_at(at, &mut self.scratch[..len])?;
                for record in self.scratch[..len].chunks_exact(RECORD_SIZE) {
                    let mut address = [0u8; 32];
                    address.copy_from_slice(&record[..32]);
                    visit(&address);
                }
                at += len as u64;
            }
        }
        Ok(())
    }

    /// Bin of the record at the front of `buffer`.
    fn record_bin(&self, buffer: &[u8]) -> usize {
        let mut address = [0u8; 32];
        address.copy_from_slice(&buffer[..32]);
        bin_index(&address, self.offsets_count)
    }

    /// Appends `new_bytes` to bin `index`'s region, relocating the region if
    /// it no longer fits where it is.
    fn update_key_set(&mut self, index: usize, new_bytes: &[u8]) -> Result<()> {
        if new_bytes.is_empty() {
            return Ok(());
        }

        let ks = self.key_sets[index];
        let extended_end = ks.end + new_bytes.len() as u64;

        // In-place append is possible when no other occupied region starts
        // inside the bytes we want to claim.
        let blocked = self.key_sets.iter().enumerate().any(|(j, other)| {
            j != index && !other.is_empty() && other.start >= ks.end && other.start < extended_end
        });

        if !blocked {
            self.file.write_at(ks.end, new_bytes)?;
            self.key_sets[index].end = extended_end;
            self.offset_sort();
            return Ok(());
        }

        // Relocate: combine the existing region with the addition and move
        // the whole thing into the first gap that fits, or to the end.
        let current_len = ks.len() as usize;
        let need = current_len + new_bytes.len();

        let mut combined = std::mem::take(&mut self.scratch);
        combined.clear();
        combined.resize(current_len, 0);
        self.file.read_at(ks.start, &mut combined[..current_len])?;
        combined.extend_from_slice(new_bytes);

        let target = self.find_gap(need as u64);
        trace!(bin = index, from = ks.start, to = target, bytes = need, "relocating history bin");
        self.file.write_at(target, &combined)?;

        self.key_sets[index] = KeySet {
            start: target,
            end: target + need as u64,
        };
        self.scratch = combined;
        self.offset_sort();
        Ok(())
    }

    /// Finds the first gap of at least `need` bytes between regions in
    /// offset order, falling back to the end of the file.
    fn find_gap(&self, need: u64) -> u64 {
        let mut offset = self.header_size;
        for &j in &self.by_offset {
            let other = self.key_sets[j];
            if other.start.saturating_sub(offset) >= need {
                return offset;
            }
            offset = offset.max(other.end);
        }
        offset
    }

    /// Re-sorts the free-space view after any region move or growth. The
    /// start tiebreaker keeps an occupied region ahead of an empty KeySet
    /// parked at the same end offset.
    fn offset_sort(&mut self) {
        let key_sets = &self.key_sets;
        self.by_offset
            .sort_by_key(|&i| (key_sets[i].end, key_sets[i].start));
    }

    fn write_header(&mut self) -> Result<()> {
        let mut buf = vec![0u8; self.header_size as usize];
        buf[..4].copy_from_slice(&self.offsets_count.to_be_bytes());
        let mut at = 4;
        for ks in &self.key_sets {
            buf[at..at + 8].copy_from_slice(&ks.start.to_be_bytes());
            buf[at + 8..at + 16].copy_from_slice(&ks.end.to_be_bytes());
            at += KEY_SET_SIZE;
        }
        self.file.write_at(0, &buf)?;
        Ok(())
    }
}

impl std::fmt::Debug for HFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let occupied = self.key_sets.iter().filter(|ks| !ks.is_empty()).count();
        f.debug_struct("HFile")
            .field("offsets_count", &self.offsets_count)
            .field("occupied_bins", &occupied)
            .field("end_of_file", &self.end_of_file())
            .finish()
    }
}
