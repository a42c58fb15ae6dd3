//! The shard router: N independent [`KV2`] stores behind one address space.
//!
//! Sharding exists to bound compaction: each shard compacts its own Dyna
//! layer when its own churn crosses the threshold, so no single rewrite
//! ever touches more than `1/num_shards` of the data.
//!
//! Shard routing hashes bytes `[4..8]` of the address while bin routing
//! inside the key files hashes bytes `[0..4]` -- disjoint ranges, so the two
//! placements are statistically independent.
//!
//! Each shard sits behind its own mutex: different shards can be mutated
//! concurrently through `&self`, while operations on one shard serialize.
//! A shard-level error surfaces to the caller and leaves the other shards
//! untouched.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use byteorder::{BigEndian, ByteOrder};
use keyfile::{Address, KFileConfig};
use tracing::{debug, info};

use crate::{Result, ShardState, StoreError, KV2};

/// Locks one shard, surfacing a poisoned lock (a writer thread panicked
/// mid-operation) as an I/O failure.
fn lock_shard(shard: &Mutex<KV2>) -> Result<MutexGuard<'_, KV2>> {
    shard
        .lock()
        .map_err(|e| StoreError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))
}

/// Configuration for a sharded store.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    /// Number of shards; fixed at creation and persisted in `state.dat`.
    pub num_shards: u16,
    /// Dyna writes within one shard that trigger its inline compaction.
    pub compress_after: u64,
    /// Key index tuning applied to every shard's Perm and Dyna layers.
    pub kfile: KFileConfig,
}

impl Default for ShardConfig {
    fn default() -> Self {
        Self {
            num_shards: 256,
            compress_after: 5000,
            // Shard-sized key files: each shard sees 1/num_shards of the
            // keys, so the per-store tables and filters shrink accordingly.
            kfile: KFileConfig {
                offsets_count: 256,
                key_limit: 50_000,
                max_cached_blocks: 50,
                bloom_size_mb: 0.25,
            },
        }
    }
}

/// Computes the shard for `key` among `num_shards` shards.
pub fn shard_index(key: &Address, num_shards: u16) -> usize {
    (BigEndian::read_u32(&key[4..8]) % num_shards as u32) as usize
}

/// An N-way fan-out of [`KV2`] stores.
pub struct KVShard {
    directory: PathBuf,
    config: ShardConfig,
    shards: Vec<Mutex<KV2>>,
}

impl KVShard {
    /// Creates a fresh sharded store in `directory`, wiping anything
    /// already there, and persists the shard count to `state.dat`.
    pub fn create<P: AsRef<Path>>(directory: P, config: ShardConfig) -> Result<Self> {
        if config.num_shards == 0 {
            return Err(StoreError::BadArgument("num_shards must be positive".into()));
        }
        let directory = directory.as_ref().to_path_buf();
        if directory.exists() {
            fs::remove_dir_all(&directory)?;
        }
        fs::create_dir_all(&directory)?;
        ShardState::create(&directory, config.num_shards)?;

        let mut shards = Vec::with_capacity(config.num_shards as usize);
        for i in 0..config.num_shards as usize {
            let kv2 = KV2::create(Self::shard_dir(&directory, i), config.kfile.clone())?;
            shards.push(Mutex::new(kv2));
        }

        info!(
            directory = %directory.display(),
            num_shards = config.num_shards,
            "created sharded store"
        );
        Ok(Self {
            directory,
            config,
            shards,
        })
    }

    /// Opens an existing sharded store. The shard count comes from
    /// `state.dat`, not from `config`.
    pub fn load<P: AsRef<Path>>(directory: P, config: ShardConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let state = ShardState::load(&directory)?;

        let mut config = config;
        config.num_shards = state.num_shards;

        let mut shards = Vec::with_capacity(config.num_shards as usize);
        for i in 0..config.num_shards as usize {
            let kv2 = KV2::load(Self::shard_dir(&directory, i), config.kfile.clone())?;
            shards.push(Mutex::new(kv2));
        }

        info!(
            directory = %directory.display(),
            num_shards = config.num_shards,
            "opened sharded store"
        );
        Ok(Self {
            directory,
            config,
            shards,
        })
    }

    /// Number of shards in this store.
    pub fn num_shards(&self) -> u16 {
        self.config.num_shards
    }

    /// Stores `value` under `key` in its shard. If the shard's Dyna churn
    /// has crossed the threshold, the shard is compressed inline while its
    /// lock is held.
    pub fn put(&self, key: Address, value: &[u8]) -> Result<()> {
        let index = shard_index(&key, self.config.num_shards);
        let mut shard = lock_shard(&self.shards[index])?;
        let writes = shard.put(key, value)?;
        if writes > self.config.compress_after {
            debug!(shard = index, writes, "compressing shard inline");
            shard.compress()?;
        }
        Ok(())
    }

    /// Fetches `key` from its shard.
    pub fn get(&self, key: &Address) -> Result<Option<Vec<u8>>> {
        let index = shard_index(key, self.config.num_shards);
        lock_shard(&self.shards[index])?.get(key)
    }

    /// Closes every shard. The first error surfaces; remaining shards are
    /// left as they are.
    pub fn close(&self) -> Result<()> {
        for shard in &self.shards {
            lock_shard(shard)?.close()?;
        }
        Ok(())
    }

    /// Reopens every shard.
    pub fn open(&self) -> Result<()> {
        for shard in &self.shards {
            lock_shard(shard)?.open()?;
        }
        Ok(())
    }

    /// Compresses every shard's Dyna layer, regardless of churn.
    pub fn compress_all(&self) -> Result<()> {
        for shard in &self.shards {
            lock_shard(shard)?.compress()?;
        }
        Ok(())
    }

    fn shard_dir(directory: &Path, index: usize) -> PathBuf {
        directory.join(format!("Shard{index:04}"))
    }
}

impl std::fmt::Debug for KVShard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KVShard")
            .field("directory", &self.directory)
            .field("num_shards", &self.config.num_shards)
            .field("compress_after", &self.config.compress_after)
            .finish()
    }
}
