//! # KFile -- Primary Cached Key Index
//!
//! The write-absorbing index in front of a values file. Every put lands in
//! an in-memory cache *and* is appended raw to `kfile.dat`; the cache always
//! supersedes the file, so reads stay correct even though appended records
//! are not bin-sorted. Two pressure valves bound memory and file growth:
//!
//! - **Rewrite cycle**: after `max_cached_blocks` buffer flushes, the file
//!   is rewritten bin-sorted (temp file + atomic rename) and the cache is
//!   dropped. From then on, lookups of those keys come from the bin ranges
//!   described by the header.
//! - **History spill**: once more than `key_limit` keys accumulate, the
//!   whole live key set is pushed into the [`HFile`] and the key file starts
//!   over empty.
//!
//! ## History mode
//!
//! With history enabled (content-addressed stores), values are immutable:
//! re-putting a key with the same descriptor is a no-op, while a differing
//! descriptor fails with [`KeyFileError::Immutable`]. A bloom filter over
//! every address ever put bounds the cost of negative lookups; it is rebuilt
//! from the key file and the history file on open.
//!
//! With history disabled (mutable state stores), puts overwrite freely,
//! there is no spill target, and no bloom is kept -- the cache and bin scan
//! serve lookups directly.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use bfile::BFile;
use bloom::BloomFilter;
use byteorder::{BigEndian, ByteOrder};
use tracing::debug;

use crate::header::bin_index;
use crate::{Address, DBBKey, HFile, Header, KeyFileError, Result, NIL_ADDRESS, RECORD_SIZE};

/// Name of the key file within its directory.
pub(crate) const KFILE_FILENAME: &str = "kfile.dat";
/// Temp file used during atomic rewrites.
const KFILE_TMP_FILENAME: &str = "kfile_tmp.dat";

/// Locks the history file, surfacing a poisoned lock (a previous holder
/// panicked mid-I/O) as an I/O failure.
fn lock_history(history: &Mutex<HFile>) -> Result<MutexGuard<'_, HFile>> {
    history
        .lock()
        .map_err(|e| KeyFileError::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))
}

/// Tuning parameters for a [`KFile`].
#[derive(Debug, Clone)]
pub struct KFileConfig {
    /// Number of bins in the offset table.
    pub offsets_count: u32,
    /// Live-key count that triggers a spill into the history file.
    pub key_limit: u64,
    /// Buffer flushes tolerated between bin-sorted rewrites.
    pub max_cached_blocks: u32,
    /// Size of the bloom filter kept by history-enabled key files, in MiB.
    pub bloom_size_mb: f64,
}

impl Default for KFileConfig {
    fn default() -> Self {
        Self {
            offsets_count: 1024,
            key_limit: 100_000,
            max_cached_blocks: 50,
            bloom_size_mb: 10.0,
        }
    }
}

/// The primary key index over a single directory's `kfile.dat`.
pub struct KFile {
    header: Header,
    file: BFile,
    directory: PathBuf,
    /// Every put since the last rewrite; always wins over the file.
    cache: HashMap<Address, DBBKey>,
    /// Spill target; present iff history mode is enabled. The mutex is held
    /// for the duration of `add_keys` and history lookups -- the only lock
    /// in this layer that spans blocking I/O.
    history: Option<Mutex<HFile>>,
    /// Covers every address ever put (key file and history alike).
    bloom: Option<BloomFilter>,
    /// Flush cycles left before the next rewrite.
    blocks_cached: i64,
    /// Keys put since the last spill.
    key_count: u64,
    /// Keys put over the life of this handle.
    total_count: u64,
    config: KFileConfig,
}

impl KFile {
    /// Creates a fresh key file in `directory`, replacing any existing one.
    ///
    /// `history` selects immutable (content-addressed) mode and creates the
    /// companion history file and bloom filter.
    pub fn create<P: AsRef<Path>>(
        directory: P,
        history: bool,
        config: KFileConfig,
    ) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let header = Header::new(config.offsets_count);

        let mut file = BFile::create(directory.join(KFILE_FILENAME))?;
        file.write_at(0, &header.marshal())?;

        let history = if history {
            Some(Mutex::new(HFile::create(&directory, config.offsets_count)?))
        } else {
            None
        };
        let bloom = history
            .is_some()
            .then(|| BloomFilter::new(config.bloom_size_mb, bloom::DEFAULT_HASHES));

        Ok(Self {
            header,
            file,
            directory,
            cache: HashMap::new(),
            history,
            bloom,
            blocks_cached: config.max_cached_blocks as i64,
            key_count: 0,
            total_count: 0,
            config,
        })
    }

    /// Loads an existing key file from `directory`. History mode is detected
    /// from the presence of a history file.
    pub fn load<P: AsRef<Path>>(directory: P, config: KFileConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let file = BFile::open_path(directory.join(KFILE_FILENAME))?;

        let history = if HFile::exists(&directory) {
            Some(Mutex::new(HFile::open(&directory)?))
        } else {
            None
        };

        let mut kfile = Self {
            header: Header::new(config.offsets_count),
            file,
            directory,
            cache: HashMap::new(),
            history,
            bloom: None,
            blocks_cached: config.max_cached_blocks as i64,
            key_count: 0,
            total_count: 0,
            config,
        };
        kfile.open()?;
        Ok(kfile)
    }

    /// Whether this key file enforces immutability and spills to history.
    pub fn history_enabled(&self) -> bool {
        self.history.is_some()
    }

    /// Keys put over the life of this handle.
    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    /// Indexes `key` at `dbbkey`.
    ///
    /// In history mode a re-put with an equal descriptor is a no-op and a
    /// differing descriptor fails with [`KeyFileError::Immutable`], leaving
    /// all state unchanged. The all-zero address is reserved and rejected.
    pub fn put(&mut self, key: Address, dbbkey: DBBKey) -> Result<()> {
        if key == NIL_ADDRESS {
            return Err(KeyFileError::BadArgument(
                "the all-zero address is reserved".into(),
            ));
        }

        if self.history.is_some() {
            if let Some(existing) = self.cache.get(&key) {
                if *existing != dbbkey {
                    return Err(KeyFileError::Immutable);
                }
                return Ok(());
            }
            // Only consult the disk when the bloom filter cannot rule the
            // key out.
            let possible = self.bloom.as_ref().map_or(true, |b| b.test(&key));
            if possible {
                if let Some(existing) = self.lookup_stored(&key)? {
                    if existing != dbbkey {
                        return Err(KeyFileError::Immutable);
                    }
                    self.cache.insert(key, existing);
                    return Ok(());
                }
            }
        }

        let previous = self.cache.insert(key, dbbkey);
        if let Some(b) = &mut self.bloom {
            b.set(&key);
        }

        match self.file.write(&dbbkey.to_bytes(&key)) {
            Ok(flushed) => {
                self.key_count += 1;
                self.total_count += 1;
                if flushed {
                    if self.blocks_cached <= 0 {
                        self.rewrite()?;
                    } else {
                        self.blocks_cached -= 1;
                    }
                }
                if self.key_count > self.config.key_limit {
                    self.key_count = 0;
                    self.push_history()?;
                }
                Ok(())
            }
            Err(e) => {
                // Roll back the cache insert; a stray bloom bit is harmless.
                match previous {
                    Some(p) => self.cache.insert(key, p),
                    None => self.cache.remove(&key),
                };
                Err(e.into())
            }
        }
    }

    /// Looks up `key`, consulting the cache, the bloom filter, the key
    /// file's bin ranges, and finally the history file.
    pub fn get(&mut self, key: &Address) -> Result<Option<DBBKey>> {
        if let Some(found) = self.cache.get(key) {
            return Ok(Some(*found));
        }
        if let Some(b) = &self.bloom {
            if !b.test(key) {
                return Ok(None);
            }
        }
        self.lookup_stored(key)
    }

    /// Flushes buffered appends to disk.
    pub fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Rewrites the file bin-sorted and releases the handle. The rewrite
    /// makes every live key reachable through the offset table, so the next
    /// [`open`](KFile::open) starts with an empty cache.
    pub fn close(&mut self) -> Result<()> {
        self.rewrite()?;
        self.file.close()?;
        Ok(())
    }

    /// Reacquires the file handle, reloads the header, and (in history
    /// mode) rebuilds the bloom filter by walking the key file and the
    /// history file.
    pub fn open(&mut self) -> Result<()> {
        self.file.open()?;

        let mut fixed = [0u8; 8];
        self.file.read_at(0, &mut fixed)?;
        let offsets_count = BigEndian::read_u32(&fixed[0..4]);
        if offsets_count == 0 {
            return Err(KeyFileError::Corrupt("key file has zero bins".into()));
        }
        let header_size = Header::size_for(offsets_count);
        let mut raw = vec![0u8; header_size as usize];
        self.file.read_at(0, &mut raw)?;
        self.header = Header::unmarshal(&raw)?;

        if self.history.is_some() {
            let mut filter =
                BloomFilter::new(self.config.bloom_size_mb, bloom::DEFAULT_HASHES);
            for (address, _) in self.stored_records()? {
                filter.set(&address);
            }
            if let Some(history) = &self.history {
                lock_history(history)?.for_each_key(|address| filter.set(address))?;
            }
            self.bloom = Some(filter);
        }

        self.blocks_cached = self.config.max_cached_blocks as i64;
        Ok(())
    }

    /// Every live key with its descriptor: the on-disk records overlaid by
    /// the cache (cache wins), plus the key list sorted by bin.
    pub fn live_keys(&mut self) -> Result<(HashMap<Address, DBBKey>, Vec<Address>)> {
        let mut map: HashMap<Address, DBBKey> = HashMap::new();
        for (address, dbbkey) in self.stored_records()? {
            map.insert(address, dbbkey);
        }
        for (address, dbbkey) in &self.cache {
            map.insert(*address, *dbbkey);
        }
        map.remove(&NIL_ADDRESS);

        let offsets_count = self.header.offsets_count();
        let mut keys: Vec<Address> = map.keys().copied().collect();
        keys.sort_by_key(|k| bin_index(k, offsets_count));
        Ok((map, keys))
    }

    /// Replaces the file's contents with exactly `records`, bin-sorted
    /// behind a fresh header, via temp file + atomic rename. The cache is
    /// cleared: afterwards every record is reachable through the header.
    pub fn rebuild(&mut self, mut records: Vec<(Address, DBBKey)>) -> Result<()> {
        let offsets_count = self.header.offsets_count();
        records.sort_by_key(|(address, _)| bin_index(address, offsets_count));

        let mut header = Header::new(offsets_count);
        let mut counts = vec![0u64; offsets_count as usize];
        for (address, _) in &records {
            counts[bin_index(address, offsets_count)] += 1;
        }
        let mut at = header.header_size() as u64;
        for (offset, count) in header.offsets.iter_mut().zip(&counts) {
            *offset = at;
            at += count * RECORD_SIZE as u64;
        }
        header.end_of_list = at;

        let tmp_path = self.directory.join(KFILE_TMP_FILENAME);
        let mut tmp = BFile::create(&tmp_path)?;
        tmp.write(&header.marshal())?;
        for (address, dbbkey) in &records {
            tmp.write(&dbbkey.to_bytes(address))?;
        }
        tmp.close()?;

        self.file.close()?;
        if let Err(e) = std::fs::rename(&tmp_path, self.file.path()) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        self.file.open()?;

        debug!(
            records = records.len(),
            bins = offsets_count,
            "rewrote key file bin-sorted"
        );

        self.header = header;
        self.cache.clear();
        self.blocks_cached = self.config.max_cached_blocks as i64;
        Ok(())
    }

    /// Spills the whole live key set into the history file and restarts the
    /// key file empty. A no-op target (history disabled) only resets the
    /// spill counter -- dropping live keys would lose data.
    pub fn push_history(&mut self) -> Result<()> {
        self.key_count = 0;
        if self.history.is_none() {
            return Ok(());
        }

        let (map, keys) = self.live_keys()?;
        if !keys.is_empty() {
            let mut buffer = Vec::with_capacity(keys.len() * RECORD_SIZE);
            for key in &keys {
                if let Some(b) = &mut self.bloom {
                    b.set(key);
                }
                buffer.extend_from_slice(&map[key].to_bytes(key));
            }
            debug!(keys = keys.len(), "spilling key file into history");
            if let Some(history) = &self.history {
                lock_history(history)?.add_keys(&buffer)?;
            }
        }

        self.reset_file()?;
        Ok(())
    }

    /// Looks up `key` in the key file's bin ranges, then the history file.
    fn lookup_stored(&mut self, key: &Address) -> Result<Option<DBBKey>> {
        if let Some(found) = self.file_get(key)? {
            return Ok(Some(found));
        }
        if let Some(history) = &self.history {
            return lock_history(history)?.get(key);
        }
        Ok(None)
    }

    /// Scans the bin range described by the header for `key`. Records
    /// appended since the last rewrite live past `end_of_list` and are
    /// covered by the cache instead.
    fn file_get(&mut self, key: &Address) -> Result<Option<DBBKey>> {
        let (start, end) = self.header.bin_range(self.header.bin_index(key));
        if start == end {
            return Ok(None);
        }

        let mut records = vec![0u8; (end - start) as usize];
        self.file.read_at(start, &mut records)?;
        for record in records.chunks_exact(RECORD_SIZE) {
            if &record[..32] == key {
                let (_, dbbkey) = DBBKey::parse(record)?;
                return Ok(Some(dbbkey));
            }
        }
        Ok(None)
    }

    /// Bin-sorted rewrite of the current live key set.
    fn rewrite(&mut self) -> Result<()> {
        let (map, _) = self.live_keys()?;
        self.rebuild(map.into_iter().collect())
    }

    /// Reads every record currently in the file, buffered tail included.
    fn stored_records(&mut self) -> Result<Vec<(Address, DBBKey)>> {
        let header_size = self.header.header_size() as u64;
        let size = self.file.logical_size();
        if size < header_size {
            return Err(KeyFileError::Corrupt(format!(
                "key file of {size} bytes is smaller than its header"
            )));
        }
        let len = (size - header_size) as usize;
        if len % RECORD_SIZE != 0 {
            return Err(KeyFileError::Corrupt(format!(
                "key region of {len} bytes is not whole records"
            )));
        }

        let mut raw = vec![0u8; len];
        self.file.read_at(header_size, &mut raw)?;

        let mut records = Vec::with_capacity(len / RECORD_SIZE);
        for record in raw.chunks_exact(RECORD_SIZE) {
            let (address, dbbkey) = DBBKey::parse(record)?;
            if address != NIL_ADDRESS {
                records.push((address, dbbkey));
            }
        }
        Ok(records)
    }

    /// Truncates the key file back to an empty header.
    fn reset_file(&mut self) -> Result<()> {
        self.file.close()?;
        self.file = BFile::create(self.directory.join(KFILE_FILENAME))?;
        self.header = Header::new(self.header.offsets_count());
        self.file.write_at(0, &self.header.marshal())?;
        self.cache.clear();
        self.blocks_cached = self.config.max_cached_blocks as i64;
        Ok(())
    }
}

impl std::fmt::Debug for KFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KFile")
            .field("directory", &self.directory)
            .field("history", &self.history.is_some())
            .field("cached", &self.cache.len())
            .field("key_count", &self.key_count)
            .field("total_count", &self.total_count)
            .finish()
    }
}
