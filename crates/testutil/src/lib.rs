//! Deterministic test support for the AnvilKV crates.
//!
//! [`FastRandom`] is a seeded sponge/xorshift generator used to produce
//! reproducible streams of addresses and value buffers in tests and
//! benchmarks. Two generators built from the same seed yield identical
//! streams, so a test can write a million keys, reset, and replay the same
//! stream to verify them without holding everything in memory. Each instance
//! is an independent value -- no process-global state -- so tests run in
//! parallel by default.

use sha2::{Digest, Sha256};

/// A fast deterministic pseudo-random generator.
///
/// Not cryptographically secure; the SHA-256 expansion is only used to turn
/// an arbitrary seed into a well-mixed sponge.
pub struct FastRandom {
    sponge: [u64; 256],
    seed: [u8; 32],
    index: u64,
    state: u64,
    /// Snapshot of (sponge, seed, index, state) taken after warmup, so
    /// `reset` can rewind to the exact start of the stream.
    start: Option<Box<FastRandom>>,
}

impl FastRandom {
    /// Creates a generator from an arbitrary seed.
    pub fn new(seed: &[u8]) -> Self {
        let mut f = Self {
            sponge: [0u64; 256],
            seed: Sha256::digest(seed).into(),
            index: 0,
            state: 0,
            start: None,
        };
        for i in 0..256 {
            f.seed = Sha256::digest(f.seed).into();
            f.sponge[i] = u64::from_be_bytes(f.seed[..8].try_into().unwrap());
        }
        for _ in 0..512 {
            f.step();
        }
        f.start = Some(Box::new(Self {
            sponge: f.sponge,
            seed: f.seed,
            index: f.index,
            state: f.state,
            start: None,
        }));
        f
    }

    /// Rewinds the generator so the same stream can be replayed.
    pub fn reset(&mut self) {
        let start = self.start.take().expect("snapshot is always present");
        self.sponge = start.sponge;
        self.seed = start.seed;
        self.index = start.index;
        self.state = start.state;
        self.start = Some(start);
    }

    fn step(&mut self) {
        self.state ^= self.sponge[(self.index & 0xFF) as usize];
        self.state ^= self.index;
        self.state ^= self.state << 11;
        self.state ^= self.state >> 15;
        self.state ^= self.state << 3;
        self.sponge[(self.index & 0xFF) as usize] ^= self.state;
        self.seed[(self.index & 0x1F) as usize] ^= self.state as u8;
        self.index ^= self.sponge[(self.state & 0xFF) as usize];
    }

    /// Returns the next `u64`.
    pub fn next_u64(&mut self) -> u64 {
        self.step();
        self.state
    }

    /// Returns a value in `0..n`.
    ///
    /// # Panics
    ///
    /// Panics if `n` is 0.
    pub fn next_range(&mut self, n: u64) -> u64 {
        assert!(n > 0, "next_range needs n > 0");
        self.step();
        self.state % n
    }

    /// Returns the next pseudo-random 32-byte address.
    pub fn next_hash(&mut self) -> [u8; 32] {
        let mut hash = [0u8; 32];
        for b in hash.iter_mut() {
            *b = self.state as u8;
            self.step();
        }
        hash
    }

    /// Returns the next bool.
    pub fn next_bool(&mut self) -> bool {
        self.step();
        self.state & 1 == 1
    }

    /// Returns a buffer of random bytes with a length in `min..=max`.
    ///
    /// `max` is capped at 100 MiB; `min` is clamped to `max`.
    pub fn rand_buff(&mut self, min: usize, max: usize) -> Vec<u8> {
        let max = max.clamp(1, 100 * 1024 * 1024);
        let min = min.min(max);
        let len = if min == max {
            max
        } else {
            min + self.next_range((max - min) as u64) as usize
        };
        let mut buff = vec![0u8; len];
        let mut chunks = buff.chunks_exact_mut(8);
        for chunk in &mut chunks {
            chunk.copy_from_slice(&self.next_u64().to_be_bytes());
        }
        for b in chunks.into_remainder() {
            *b = self.next_u64() as u8;
        }
        buff
    }
}
