use keyfile::{Address, KFileConfig};
use testutil::FastRandom;

/// A small key index configuration that keeps test stores light.
pub fn small_config() -> KFileConfig {
    KFileConfig {
        offsets_count: 64,
        key_limit: 1_000_000,
        max_cached_blocks: 50,
        bloom_size_mb: 0.25,
    }
}

/// Deterministic `(address, value)` pairs with value lengths in `min..=max`.
pub fn random_pairs(seed: &[u8], n: usize, min: usize, max: usize) -> Vec<(Address, Vec<u8>)> {
    let mut fr = FastRandom::new(seed);
    (0..n)
        .map(|_| (fr.next_hash(), fr.rand_buff(min, max)))
        .collect()
}
