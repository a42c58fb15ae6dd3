use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;
use testutil::FastRandom;

use super::helpers::{random_pairs, small_config};
use crate::{shard_index, KVShard, ShardConfig};

fn test_config(num_shards: u16) -> ShardConfig {
    ShardConfig {
        num_shards,
        compress_after: 5000,
        kfile: small_config(),
    }
}

#[test]
fn shard_index_uses_bytes_four_to_eight() {
    let mut key = [0u8; 32];
    key[4..8].copy_from_slice(&77_777u32.to_be_bytes());
    assert_eq!(shard_index(&key, 256), (77_777 % 256) as usize);

    // The bin-routing bytes must not influence shard placement.
    key[0..4].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
    assert_eq!(shard_index(&key, 256), (77_777 % 256) as usize);
}

#[test]
fn read_your_writes_across_all_shards() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("store");
    let store = KVShard::create(&path, test_config(256))?;

    let pairs = random_pairs(b"shard-ryw", 20_000, 100, 1000);
    for (address, value) in &pairs {
        store.put(*address, value)?;
    }
    // Readable before any close.
    for (address, value) in &pairs {
        assert_eq!(store.get(address)?.as_deref(), Some(value.as_slice()));
    }

    store.close()?;
    drop(store);

    // And again from a cold start.
    let store = KVShard::load(&path, test_config(1))?; // count comes from state.dat
    assert_eq!(store.num_shards(), 256);
    for (address, value) in &pairs {
        assert_eq!(
            store.get(address)?.as_deref(),
            Some(value.as_slice()),
            "value lost across reopen"
        );
    }
    Ok(())
}

#[test]
fn churn_triggers_inline_compression() -> Result<()> {
    let dir = tempdir()?;
    let mut config = test_config(4);
    config.compress_after = 10;
    let store = KVShard::create(dir.path().join("store"), config)?;
    let mut fr = FastRandom::new(b"shard-churn");

    let address = fr.next_hash();
    let mut last = Vec::new();
    for _ in 0..50 {
        last = fr.rand_buff(10, 100);
        store.put(address, &last)?;
    }
    assert_eq!(store.get(&address)?.as_deref(), Some(last.as_slice()));
    Ok(())
}

#[test]
fn distinct_shards_accept_concurrent_writers() -> Result<()> {
    let dir = tempdir()?;
    let store = Arc::new(KVShard::create(dir.path().join("store"), test_config(16))?);

    let mut handles = Vec::new();
    for t in 0..4u8 {
        let store = Arc::clone(&store);
        handles.push(std::thread::spawn(move || -> Result<()> {
            let pairs = random_pairs(&[b's', b'h', t], 500, 10, 200);
            for (address, value) in &pairs {
                store.put(*address, value)?;
            }
            for (address, value) in &pairs {
                assert_eq!(store.get(address)?.as_deref(), Some(value.as_slice()));
            }
            Ok(())
        }));
    }
    for handle in handles {
        handle.join().expect("writer thread panicked")?;
    }
    Ok(())
}

#[test]
fn compress_all_preserves_content() -> Result<()> {
    let dir = tempdir()?;
    let store = KVShard::create(dir.path().join("store"), test_config(8))?;

    let pairs = random_pairs(b"shard-compress", 2000, 10, 200);
    for (address, value) in &pairs {
        store.put(*address, value)?;
    }
    // Overwrite half so the Dyna layers have something to reclaim.
    let mut expected = Vec::new();
    for (i, (address, value)) in pairs.iter().enumerate() {
        if i % 2 == 0 {
            let mut changed = value.clone();
            changed.extend_from_slice(b"v2");
            store.put(*address, &changed)?;
            expected.push((*address, changed));
        } else {
            expected.push((*address, value.clone()));
        }
    }

    store.compress_all()?;
    for (address, value) in &expected {
        assert_eq!(store.get(address)?.as_deref(), Some(value.as_slice()));
    }
    Ok(())
}

#[test]
fn zero_shards_is_rejected() {
    let dir = tempdir().unwrap();
    let config = test_config(0);
    assert!(KVShard::create(dir.path().join("store"), config).is_err());
}
