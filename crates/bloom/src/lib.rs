//! # Bloom Filter
//!
//! A space-efficient probabilistic membership test over 32-byte addresses.
//!
//! A bloom filter can tell you with certainty that an address is **not** in
//! the set (no false negatives), but may occasionally report that an address
//! **is** in the set when it isn't (false positives). The false positive rate
//! depends on the size of the bit array and the number of hash functions.
//!
//! ## Usage in AnvilKV
//!
//! Every history-enabled key index owns a bloom filter holding every address
//! it has ever indexed. Point lookups consult the filter before any disk I/O
//! -- if it says "not present", both the key file and the history file are
//! skipped entirely.
//!
//! ## Hashing
//!
//! Addresses are already cryptographic hashes, so no further mixing is
//! needed: hash function `i` is simply the big-endian `u64` read from the
//! 8-byte window of the address starting at byte `(i * 8) % 24`, reduced
//! modulo the number of bits in the filter.
//!
//! ## Example
//!
//! ```rust
//! use bloom::BloomFilter;
//!
//! let mut bf = BloomFilter::new(1.0, 3);
//! bf.set(&[7u8; 32]);
//! assert!(bf.test(&[7u8; 32]));
//! ```

/// Default number of hash functions.
pub const DEFAULT_HASHES: usize = 3;

/// A bloom filter backed by a byte array with `k` hash functions derived
/// from disjoint 8-byte windows of the address.
pub struct BloomFilter {
    /// The bit array storing the filter state.
    bits: Vec<u8>,
    /// Number of addressable bits (`bits.len() * 8`).
    num_bits: u64,
    /// Number of hash functions (k).
    num_hashes: usize,
}

impl BloomFilter {
    /// Creates a new bloom filter of `size_mb` mebibytes with `k` hash
    /// functions.
    ///
    /// # Panics
    ///
    /// Panics if `size_mb` is not positive or `k` is 0.
    pub fn new(size_mb: f64, k: usize) -> Self {
        assert!(size_mb > 0.0, "bloom filter size must be positive");
        assert!(k >= 1, "bloom filter needs at least one hash function");

        let num_bytes = (size_mb * 1024.0 * 1024.0) as usize;
        let num_bytes = num_bytes.max(8);

        Self {
            bits: vec![0u8; num_bytes],
            num_bits: (num_bytes as u64) * 8,
            num_hashes: k,
        }
    }

    /// Inserts an address into the filter.
    pub fn set(&mut self, key: &[u8; 32]) {
        for i in 0..self.num_hashes {
            let (idx, mask) = self.byte_mask(key, i);
            self.bits[idx] |= mask;
        }
    }

    /// Returns `true` if the address **might** be in the set, `false` if it
    /// is **definitely not** in the set.
    #[must_use]
    pub fn test(&self, key: &[u8; 32]) -> bool {
        for i in 0..self.num_hashes {
            let (idx, mask) = self.byte_mask(key, i);
            if self.bits[idx] & mask == 0 {
                return false;
            }
        }
        true
    }

    /// Returns the number of bits in the filter.
    #[must_use]
    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    /// Returns the number of hash functions.
    #[must_use]
    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    /// Maps hash function `hash_num` of `key` to a byte index and bit mask.
    ///
    /// The window offset wraps at 24 so every window has a full 8 bytes of
    /// the 32-byte address to read from.
    fn byte_mask(&self, key: &[u8; 32], hash_num: usize) -> (usize, u8) {
        let offset = (hash_num * 8) % 24;
        let word = u64::from_be_bytes(key[offset..offset + 8].try_into().unwrap());
        let bit = word % self.num_bits;
        ((bit / 8) as usize, 1u8 << (bit % 8))
    }
}

impl std::fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BloomFilter")
            .field("num_bits", &self.num_bits)
            .field("num_hashes", &self.num_hashes)
            .field("bytes", &self.bits.len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
