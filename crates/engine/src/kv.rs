//! The paired store: a values file bound to a key index.
//!
//! `values.dat` is a raw concatenation of value bytes with no per-record
//! framing -- the key index's `(offset, length)` descriptors are the only
//! record boundaries. A put appends the value bytes *first*, so a failed
//! descriptor commit leaves nothing worse than orphaned bytes for the next
//! `compress()` to reclaim.

use std::fs;
use std::path::{Path, PathBuf};

use bfile::BFile;
use keyfile::{Address, DBBKey, KFile, KFileConfig};
use tracing::debug;

use crate::Result;

/// Name of the values file within a KV directory.
const VALUES_FILENAME: &str = "values.dat";
/// Temp file used while compressing the values file.
const VALUES_TMP_FILENAME: &str = "values_tmp.dat";

/// A single-directory key/value store: `values.dat` plus a [`KFile`].
pub struct KV {
    directory: PathBuf,
    values: BFile,
    kfile: KFile,
}

impl KV {
    /// Creates a fresh store in `directory`, wiping anything already there.
    ///
    /// `history` selects the immutable (content-addressed) key index mode.
    pub fn create<P: AsRef<Path>>(
        directory: P,
        history: bool,
        config: KFileConfig,
    ) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        if directory.exists() {
            fs::remove_dir_all(&directory)?;
        }
        fs::create_dir_all(&directory)?;

        let kfile = KFile::create(&directory, history, config)?;
        let values = BFile::create(directory.join(VALUES_FILENAME))?;
        Ok(Self {
            directory,
            values,
            kfile,
        })
    }

    /// Loads an existing store from `directory`.
    pub fn load<P: AsRef<Path>>(directory: P, config: KFileConfig) -> Result<Self> {
        let directory = directory.as_ref().to_path_buf();
        let kfile = KFile::load(&directory, config)?;
        let values = BFile::open_path(directory.join(VALUES_FILENAME))?;
        Ok(Self {
            directory,
            values,
            kfile,
        })
    }

    /// Stores `value` under `key`. The value bytes are appended before the
    /// descriptor is committed to the key index.
    pub fn put(&mut self, key: Address, value: &[u8]) -> Result<()> {
        let dbbkey = DBBKey {
            offset: self.values.logical_size(),
            length: value.len() as u64,
        };
        self.values.write(value)?;
        self.kfile.put(key, dbbkey)?;
        Ok(())
    }

    /// Fetches the value stored under `key`, if any. Zero-length values
    /// round-trip to an empty vector.
    pub fn get(&mut self, key: &Address) -> Result<Option<Vec<u8>>> {
        let Some(dbbkey) = self.kfile.get(key)? else {
            return Ok(None);
        };
        let mut value = vec![0u8; dbbkey.length as usize];
        self.values.read_at(dbbkey.offset, &mut value)?;
        Ok(Some(value))
    }

    /// Rewrites the values file keeping only live values, reclaiming the
    /// space of overwritten and orphaned ones.
    ///
    /// The surviving values are copied into a temp file which is renamed
    /// over `values.dat`; if the rename fails the temp file is deleted and
    /// the original store is untouched. The key index is rebuilt with the
    /// relocated descriptors.
    pub fn compress(&mut self) -> Result<()> {
        let (map, keys) = self.kfile.live_keys()?;

        let tmp_path = self.directory.join(VALUES_TMP_FILENAME);
        let mut tmp = BFile::create(&tmp_path)?;
        let mut records = Vec::with_capacity(keys.len());
        for key in keys {
            let dbbkey = map[&key];
            let mut value = vec![0u8; dbbkey.length as usize];
            self.values.read_at(dbbkey.offset, &mut value)?;
            let offset = tmp.logical_size();
            tmp.write(&value)?;
            records.push((
                key,
                DBBKey {
                    offset,
                    length: dbbkey.length,
                },
            ));
        }
        tmp.close()?;

        self.values.close()?;
        if let Err(e) = fs::rename(&tmp_path, self.values.path()) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        self.values.open()?;

        self.kfile.rebuild(records)?;
        debug!(
            directory = %self.directory.display(),
            live_bytes = self.values.logical_size(),
            "compressed values file"
        );
        Ok(())
    }

    /// Flushes and releases both file handles.
    pub fn close(&mut self) -> Result<()> {
        self.kfile.close()?;
        self.values.close()?;
        Ok(())
    }

    /// Reacquires both file handles after a `close`.
    pub fn open(&mut self) -> Result<()> {
        self.kfile.open()?;
        self.values.open()?;
        Ok(())
    }

    /// On-disk plus buffered size of the values file.
    pub fn values_size(&self) -> u64 {
        self.values.logical_size()
    }
}

impl std::fmt::Debug for KV {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KV")
            .field("directory", &self.directory)
            .field("values_size", &self.values.logical_size())
            .field("kfile", &self.kfile)
            .finish()
    }
}
