use super::*;
use testutil::FastRandom;

#[test]
fn set_then_test_is_always_true() {
    let mut bf = BloomFilter::new(0.25, 3);
    let mut fr = FastRandom::new(b"bloom-set");
    let keys: Vec<[u8; 32]> = (0..10_000).map(|_| fr.next_hash()).collect();

    for k in &keys {
        bf.set(k);
    }
    for k in &keys {
        assert!(bf.test(k), "no false negatives allowed");
    }
}

#[test]
fn empty_filter_rejects_everything() {
    let bf = BloomFilter::new(0.25, 3);
    let mut fr = FastRandom::new(b"bloom-empty");
    for _ in 0..1000 {
        assert!(!bf.test(&fr.next_hash()));
    }
}

#[test]
fn false_positive_rate_is_bounded() {
    // Scaled-down version of the 6 MiB / 1M key sizing: the load factor and
    // therefore the expected false-positive rate are far below the 5% bound.
    let mut bf = BloomFilter::new(1.0, 3);
    let mut insert = FastRandom::new(b"bloom-inserts");
    for _ in 0..100_000 {
        bf.set(&insert.next_hash());
    }

    let mut probe = FastRandom::new(b"bloom-probes");
    let trials = 100_000u32;
    let positives = (0..trials).filter(|_| bf.test(&probe.next_hash())).count();

    let rate = positives as f64 / trials as f64;
    assert!(rate < 0.05, "false positive rate {rate} exceeds 5%");
}

#[test]
fn distinct_windows_distinguish_keys() {
    // Two keys that agree on the first window but differ on the second must
    // not alias each other. The differing byte sits at the low end of the
    // window so the modulo reduction cannot mask it.
    let mut bf = BloomFilter::new(0.25, 3);
    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    a[15] = 1;
    b[15] = 2;
    bf.set(&a);
    assert!(bf.test(&a));
    assert!(!bf.test(&b));
}

#[test]
fn single_hash_filter_works() {
    let mut bf = BloomFilter::new(0.25, 1);
    let key = [0xAB; 32];
    assert!(!bf.test(&key));
    bf.set(&key);
    assert!(bf.test(&key));
}

#[test]
#[should_panic(expected = "at least one hash function")]
fn zero_hashes_rejected() {
    let _ = BloomFilter::new(1.0, 0);
}

#[test]
fn size_is_respected() {
    let bf = BloomFilter::new(2.0, 3);
    assert_eq!(bf.num_bits(), 2 * 1024 * 1024 * 8);
    assert_eq!(bf.num_hashes(), 3);
}
