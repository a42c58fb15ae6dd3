//! # KeyFile -- Bin-Partitioned Key Indexes
//!
//! On-disk index structures mapping 32-byte addresses to `(offset, length)`
//! value descriptors for the AnvilKV storage engine.
//!
//! ## Components
//!
//! | Module    | Purpose                                                  |
//! |-----------|----------------------------------------------------------|
//! | `dbbkey`  | [`Address`], [`DBBKey`], and the 48-byte record codec    |
//! | `header`  | The offset-table [`Header`] shared by both index files   |
//! | `kfile`   | The primary cached key index ([`KFile`])                 |
//! | `hfile`   | The history/spill-over index ([`HFile`])                 |
//!
//! ## Bin partitioning
//!
//! Both indexes split the address space into `offsets_count` bins selected
//! by `u32_be(address[0..4]) % offsets_count`. A point lookup reads one
//! bin's byte range and scans its 48-byte records linearly. Shard routing
//! (in the engine) hashes bytes `[4..8]`, so bin and shard placement are
//! statistically independent.
//!
//! ## Lifecycle
//!
//! A [`KFile`] absorbs writes into an in-memory cache while appending raw
//! records to its file. Periodic rewrites re-sort the file by bin so the
//! cache can be dropped; when the live key count crosses a limit, the whole
//! key set is spilled into the [`HFile`], which holds arbitrarily large
//! bin-partitioned key sets and relocates bins as they outgrow their
//! reserved regions.

mod dbbkey;
mod header;
mod hfile;
mod kfile;

pub use dbbkey::{Address, DBBKey, NIL_ADDRESS, RECORD_SIZE};
pub use header::{bin_index, Header};
pub use hfile::{HFile, MAX_OFFSETS_COUNT};
pub use kfile::{KFile, KFileConfig};

use thiserror::Error;

/// Errors from key index operations.
#[derive(Debug, Error)]
pub enum KeyFileError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the underlying buffered file.
    #[error("bfile error: {0}")]
    BFile(#[from] bfile::BFileError),

    /// An attempt to overwrite a content-addressed value with a different
    /// one in a history-enabled key file.
    #[error("cannot overwrite an immutable value")]
    Immutable,

    /// An on-disk structure failed validation.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// A caller-supplied argument is outside the documented bounds.
    #[error("bad argument: {0}")]
    BadArgument(String),
}

pub type Result<T> = std::result::Result<T, KeyFileError>;

#[cfg(test)]
mod tests;
