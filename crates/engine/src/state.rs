//! The shard-count record persisted at the root of a sharded store.
//!
//! `state.dat` is exactly two bytes: the shard count as a big-endian `u16`.
//! It exists so a store can be reopened without knowing its configuration --
//! the count on disk is authoritative, not the caller's.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Result, StoreError};

/// Name of the state file at the root of a [`KVShard`](crate::KVShard)
/// directory.
pub const STATE_FILENAME: &str = "state.dat";

/// Temp file used during atomic state writes.
const STATE_TMP_FILENAME: &str = "state_tmp.dat";

/// The persisted shard count.
#[derive(Debug, Clone)]
pub struct ShardState {
    path: PathBuf,
    pub num_shards: u16,
}

impl ShardState {
    /// Creates and persists the state record in `directory`.
    pub fn create<P: AsRef<Path>>(directory: P, num_shards: u16) -> Result<Self> {
        let state = Self {
            path: directory.as_ref().join(STATE_FILENAME),
            num_shards,
        };
        state.save()?;
        Ok(state)
    }

    /// Loads the state record from `directory`.
    pub fn load<P: AsRef<Path>>(directory: P) -> Result<Self> {
        let path = directory.as_ref().join(STATE_FILENAME);
        let data = fs::read(&path)?;
        if data.len() < 2 {
            return Err(StoreError::Corrupt(format!(
                "state file holds {} bytes, need 2",
                data.len()
            )));
        }
        let num_shards = u16::from_be_bytes([data[0], data[1]]);
        if num_shards == 0 {
            return Err(StoreError::Corrupt("state file has zero shards".into()));
        }
        Ok(Self { path, num_shards })
    }

    /// Persists the record: write a temp file, then rename over the
    /// original so the state is never half-written.
    pub fn save(&self) -> Result<()> {
        let tmp = self.path.with_file_name(STATE_TMP_FILENAME);
        fs::write(&tmp, self.num_shards.to_be_bytes())?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }
}
