//! # Engine -- The AnvilKV Store Stack
//!
//! Composes the [`bfile`] and [`keyfile`] crates into the embedded
//! key/value store: values bound to key indexes, split by mutability,
//! fanned out across shards.
//!
//! ## Architecture
//!
//! ```text
//! KVShard                 router: u32_be(address[4..8]) % num_shards
//!   │
//!   ▼
//! KV2                     Dyna (mutable) over Perm (immutable)
//!   │
//!   ▼
//! KV                      values.dat (BFile) + kfile.dat (KFile)
//!   │
//!   ▼
//! KFile ──▶ HFile         cached index, bloom, history spill
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module  | Purpose                                                |
//! |---------|--------------------------------------------------------|
//! | `kv`    | Pairs a values file with a key index ([`KV`])          |
//! | `kv2`   | Perm/Dyna routing ([`KV2`]): immutable never compacts  |
//! | `shard` | N-way fan-out ([`KVShard`]) with per-shard locking     |
//! | `state` | The 2-byte `state.dat` record ([`ShardState`])         |
//!
//! ## Write path
//!
//! A put routes to its shard, then to Dyna or Perm based on prior state:
//! keys seen to change live in Dyna (freely overwritten, periodically
//! compacted), everything else lands in Perm (content-addressed, immutable,
//! never compacted). The value bytes are appended to `values.dat` first;
//! only then is the descriptor committed to the key index.
//!
//! ## Read path
//!
//! Dyna first, Perm on miss -- a promoted key's stale Perm value is shadowed
//! forever. Absence is `Ok(None)`; `Err` always means a real failure.

mod kv;
mod kv2;
mod shard;
mod state;

pub use keyfile::{Address, DBBKey, KFileConfig};
pub use kv::KV;
pub use kv2::KV2;
pub use shard::{shard_index, KVShard, ShardConfig};
pub use state::ShardState;

use thiserror::Error;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from a buffered file.
    #[error(transparent)]
    BFile(#[from] bfile::BFileError),

    /// An error from a key index, including immutability violations.
    #[error(transparent)]
    KeyFile(#[from] keyfile::KeyFileError),

    /// An on-disk structure failed validation.
    #[error("corrupt data: {0}")]
    Corrupt(String),

    /// A caller-supplied argument is outside the documented bounds.
    #[error("bad argument: {0}")]
    BadArgument(String),
}

impl StoreError {
    /// Whether this error is an immutability violation from a
    /// history-enabled key index.
    pub fn is_immutable(&self) -> bool {
        matches!(
            self,
            StoreError::KeyFile(keyfile::KeyFileError::Immutable)
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests;
