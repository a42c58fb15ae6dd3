//! The two-tier store: immutable Perm under mutable Dyna.
//!
//! Blockchain-style workloads write mostly content-addressed data that
//! never changes, plus a minority of state keys that churn. Splitting the
//! two means compaction only ever touches the churning minority: the Perm
//! layer grows append-only and is never rewritten.
//!
//! A key's first write lands in Perm. The moment a differing value arrives
//! for it, the key is *promoted*: the new value goes to Dyna, and since
//! reads check Dyna first, the stale Perm value is shadowed from then on.
//! (Its bytes are not reclaimed -- accepted, since Perm is assumed small or
//! constant relative to Dyna churn.)

use std::fs;
use std::path::{Path, PathBuf};

use keyfile::{Address, KFileConfig};

use crate::{Result, KV};

/// Subdirectory of the immutable layer.
const PERM_DIR_NAME: &str = "perm";
/// Subdirectory of the mutable layer.
const DYNA_DIR_NAME: &str = "dyna";

/// A two-layer store: a history-enabled Perm [`KV`] and a plain Dyna [`KV`].
pub struct KV2 {
    directory: PathBuf,
    perm: KV,
    dyna: KV,
    /// Perm puts since the last compress.
    perm_writes: u64,
    /// Dyna puts since the last compress; drives compaction scheduling.
    dyna_writes: u64,
}

impl KV2 {
    /// Creates a fresh two-tier store in `directory`, wiping anything
    /// already there.
    pub fn create<P: AsRef<Path>>(directory: P, config: KFileConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if directory.exists() {
            fs::remove_dir_all(&directory)?;
        }
        fs::create_dir_all(&directory)?;

        let perm = KV::create(directory.join(PERM_DIR_NAME), true, config.clone())?;
        let dyna = KV::create(directory.join(DYNA_DIR_NAME), false, config)?;
        Ok(Self {
            directory,
            perm,
            dyna,
            perm_writes: 0,
            dyna_writes: 0,
        })
    }

    /// Loads an existing two-tier store from `directory`.
    pub fn load<P: AsRef<Path>>(directory: P, config: KFileConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let perm = KV::load(directory.join(PERM_DIR_NAME), config.clone())?;
        let dyna = KV::load(directory.join(DYNA_DIR_NAME), config)?;
        Ok(Self {
            directory,
            perm,
            dyna,
            perm_writes: 0,
            dyna_writes: 0,
        })
    }

    /// Stores `value` under `key`, routing on the key's prior state.
    ///
    /// Returns the number of Dyna writes since the last compress so callers
    /// can schedule compaction (Perm never compacts, so only Dyna churn
    /// matters).
    pub fn put(&mut self, key: Address, value: &[u8]) -> Result<u64> {
        // A key already in Dyna stays in Dyna.
        if let Some(existing) = self.dyna.get(&key)? {
            if existing != value {
                self.dyna_writes += 1;
                self.dyna.put(key, value)?;
            }
            return Ok(self.dyna_writes);
        }

        // A key in Perm is a no-op when unchanged; a differing value
        // promotes it to Dyna.
        if let Some(existing) = self.perm.get(&key)? {
            if existing == value {
                return Ok(self.dyna_writes);
            }
            self.dyna_writes += 1;
            self.dyna.put(key, value)?;
            return Ok(self.dyna_writes);
        }

        // First sighting: assume immutable until proven otherwise.
        self.perm_writes += 1;
        self.perm.put(key, value)?;
        Ok(self.dyna_writes)
    }

    /// Fetches `key`, checking Dyna first so promoted keys shadow their
    /// stale Perm values.
    pub fn get(&mut self, key: &Address) -> Result<Option<Vec<u8>>> {
        if let Some(value) = self.dyna.get(key)? {
            return Ok(Some(value));
        }
        self.perm.get(key)
    }

    /// Compresses the Dyna layer and resets the write counters. Perm is
    /// never compressed.
    pub fn compress(&mut self) -> Result<()> {
        self.dyna.compress()?;
        self.dyna_writes = 0;
        self.perm_writes = 0;
        Ok(())
    }

    /// Closes both layers.
    pub fn close(&mut self) -> Result<()> {
        self.perm.close()?;
        self.dyna.close()
    }

    /// Reopens both layers.
    pub fn open(&mut self) -> Result<()> {
        self.perm.open()?;
        self.dyna.open()
    }

    /// Dyna puts since the last compress.
    pub fn dyna_writes(&self) -> u64 {
        self.dyna_writes
    }

    /// Perm puts since the last compress.
    pub fn perm_writes(&self) -> u64 {
        self.perm_writes
    }
}

impl std::fmt::Debug for KV2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KV2")
            .field("directory", &self.directory)
            .field("perm_writes", &self.perm_writes)
            .field("dyna_writes", &self.dyna_writes)
            .finish()
    }
}
