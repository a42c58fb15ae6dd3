//! The variable-width offset-table header at the front of a key file.
//!
//! ## Layout (all big-endian)
//!
//! ```text
//! [offsets_count: u32][header_size: u32][offsets: u64 × offsets_count][end_of_list: u64]
//! ```
//!
//! Bin `i` occupies the byte range `[offsets[i], offsets[i+1])`, or
//! `[offsets[last], end_of_list)` for the final bin. `end_of_list` exists
//! because the file can hold records appended after the last rewrite; those
//! live past `end_of_list` and are covered by the in-memory cache instead of
//! the offset table.

use byteorder::{BigEndian, ByteOrder};

use crate::{Address, KeyFileError, Result};

/// Computes the bin for `key` among `offsets_count` bins.
///
/// Bins hash the first four bytes of the address; shard routing uses bytes
/// `[4..8]`, keeping the two placements independent.
pub fn bin_index(key: &Address, offsets_count: u32) -> usize {
    (BigEndian::read_u32(&key[0..4]) % offsets_count) as usize
}

/// The offset table mapping bins to byte ranges of the key region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    offsets_count: u32,
    header_size: u32,
    /// Byte offset where each bin's records begin.
    pub offsets: Vec<u64>,
    /// Byte offset just past the last bin's records.
    pub end_of_list: u64,
}

impl Header {
    /// Creates a header for an empty file: every bin starts and ends at the
    /// end of the header itself.
    pub fn new(offsets_count: u32) -> Self {
        assert!(offsets_count > 0, "offsets_count must be positive");
        let header_size = Self::size_for(offsets_count);
        Self {
            offsets_count,
            header_size,
            offsets: vec![header_size as u64; offsets_count as usize],
            end_of_list: header_size as u64,
        }
    }

    /// The marshaled size of a header with `offsets_count` bins.
    pub fn size_for(offsets_count: u32) -> u32 {
        4 + 4 + 8 * offsets_count + 8
    }

    pub fn offsets_count(&self) -> u32 {
        self.offsets_count
    }

    pub fn header_size(&self) -> u32 {
        self.header_size
    }

    /// The bin for `key` under this header's partitioning.
    pub fn bin_index(&self, key: &Address) -> usize {
        bin_index(key, self.offsets_count)
    }

    /// The byte range `[start, end)` holding bin `i`'s records.
    pub fn bin_range(&self, i: usize) -> (u64, u64) {
        let start = self.offsets[i];
        let end = if i + 1 < self.offsets.len() {
            self.offsets[i + 1]
        } else {
            self.end_of_list
        };
        (start, end)
    }

    /// Serializes the header to its on-disk form.
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.header_size as usize];
        BigEndian::write_u32(&mut buf[0..4], self.offsets_count);
        BigEndian::write_u32(&mut buf[4..8], self.header_size);
        let mut at = 8;
        for v in &self.offsets {
            BigEndian::write_u64(&mut buf[at..at + 8], *v);
            at += 8;
        }
        BigEndian::write_u64(&mut buf[at..at + 8], self.end_of_list);
        buf
    }

    /// Parses and validates an on-disk header.
    pub fn unmarshal(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(KeyFileError::Corrupt(format!(
                "header too short: {} bytes",
                data.len()
            )));
        }
        let offsets_count = BigEndian::read_u32(&data[0..4]);
        if offsets_count == 0 {
            return Err(KeyFileError::Corrupt("header has zero bins".into()));
        }
        let header_size = BigEndian::read_u32(&data[4..8]);
        if header_size != Self::size_for(offsets_count) {
            return Err(KeyFileError::Corrupt(format!(
                "header size {} does not match {} bins",
                header_size, offsets_count
            )));
        }
        if data.len() < header_size as usize {
            return Err(KeyFileError::Corrupt(format!(
                "header truncated: {} of {} bytes",
                data.len(),
                header_size
            )));
        }

        let mut offsets = Vec::with_capacity(offsets_count as usize);
        let mut at = 8;
        for _ in 0..offsets_count {
            offsets.push(BigEndian::read_u64(&data[at..at + 8]));
            at += 8;
        }
        let end_of_list = BigEndian::read_u64(&data[at..at + 8]);

        if offsets[0] < header_size as u64 {
            return Err(KeyFileError::Corrupt(format!(
                "first bin offset {} lies inside the header ({})",
                offsets[0], header_size
            )));
        }
        for pair in offsets.windows(2) {
            if pair[0] > pair[1] {
                return Err(KeyFileError::Corrupt(format!(
                    "bin offsets not monotone: {} > {}",
                    pair[0], pair[1]
                )));
            }
        }
        if *offsets.last().unwrap() > end_of_list {
            return Err(KeyFileError::Corrupt(format!(
                "end of list {} precedes the last bin offset {}",
                end_of_list,
                offsets.last().unwrap()
            )));
        }

        Ok(Self {
            offsets_count,
            header_size,
            offsets,
            end_of_list,
        })
    }
}
