use anyhow::Result;
use tempfile::tempdir;
use testutil::FastRandom;

use super::helpers::{random_pairs, small_config};
use crate::KV2;

#[test]
fn first_write_lands_in_perm() -> Result<()> {
    let dir = tempdir()?;
    let mut kv2 = KV2::create(dir.path().join("kv2"), small_config())?;
    let mut fr = FastRandom::new(b"kv2-perm");

    let address = fr.next_hash();
    kv2.put(address, b"immutable bytes")?;
    assert_eq!(kv2.perm_writes(), 1);
    assert_eq!(kv2.dyna_writes(), 0);
    assert_eq!(kv2.get(&address)?.as_deref(), Some(&b"immutable bytes"[..]));
    Ok(())
}

#[test]
fn identical_reput_is_a_no_op() -> Result<()> {
    let dir = tempdir()?;
    let mut kv2 = KV2::create(dir.path().join("kv2"), small_config())?;
    let mut fr = FastRandom::new(b"kv2-noop");

    let address = fr.next_hash();
    kv2.put(address, b"same")?;
    kv2.put(address, b"same")?;
    kv2.put(address, b"same")?;
    assert_eq!(kv2.perm_writes(), 1);
    assert_eq!(kv2.dyna_writes(), 0);
    Ok(())
}

#[test]
fn conflicting_write_promotes_to_dyna() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv2");
    let mut kv2 = KV2::create(&path, small_config())?;
    let mut fr = FastRandom::new(b"kv2-promote");

    let address = fr.next_hash();
    kv2.put(address, b"first")?;
    kv2.put(address, b"second")?; // differs: promoted to Dyna
    assert_eq!(kv2.dyna_writes(), 1);
    assert_eq!(kv2.get(&address)?.as_deref(), Some(&b"second"[..]));

    // Once in Dyna, the key stays there.
    kv2.put(address, b"third")?;
    assert_eq!(kv2.dyna_writes(), 2);
    assert_eq!(kv2.get(&address)?.as_deref(), Some(&b"third"[..]));

    // The Dyna value still shadows the stale Perm value after a reopen.
    kv2.close()?;
    let mut kv2 = KV2::load(&path, small_config())?;
    assert_eq!(kv2.get(&address)?.as_deref(), Some(&b"third"[..]));
    Ok(())
}

#[test]
fn unchanged_dyna_reput_is_a_no_op() -> Result<()> {
    let dir = tempdir()?;
    let mut kv2 = KV2::create(dir.path().join("kv2"), small_config())?;
    let mut fr = FastRandom::new(b"kv2-dyna-noop");

    let address = fr.next_hash();
    kv2.put(address, b"a")?;
    kv2.put(address, b"b")?; // promote
    let writes = kv2.dyna_writes();
    kv2.put(address, b"b")?; // unchanged
    assert_eq!(kv2.dyna_writes(), writes);
    Ok(())
}

#[test]
fn compress_touches_only_dyna_and_resets_counters() -> Result<()> {
    let dir = tempdir()?;
    let mut kv2 = KV2::create(dir.path().join("kv2"), small_config())?;
    let mut fr = FastRandom::new(b"kv2-compress");

    // A stable population in Perm.
    let stable = random_pairs(b"kv2-stable", 100, 10, 100);
    for (address, value) in &stable {
        kv2.put(*address, value)?;
    }

    // A churning key in Dyna.
    let churn = fr.next_hash();
    let mut last = Vec::new();
    for _ in 0..20 {
        last = fr.rand_buff(10, 100);
        kv2.put(churn, &last)?;
    }
    assert!(kv2.dyna_writes() > 0);

    kv2.compress()?;
    assert_eq!(kv2.dyna_writes(), 0);
    assert_eq!(kv2.perm_writes(), 0);

    assert_eq!(kv2.get(&churn)?.as_deref(), Some(last.as_slice()));
    for (address, value) in &stable {
        assert_eq!(kv2.get(address)?.as_deref(), Some(value.as_slice()));
    }
    Ok(())
}

#[test]
fn mixed_population_survives_reopen() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("kv2");
    let mut kv2 = KV2::create(&path, small_config())?;

    let pairs = random_pairs(b"kv2-mixed", 1000, 10, 200);
    for (address, value) in &pairs {
        kv2.put(*address, value)?;
    }
    // Promote every third key.
    let mut expected: Vec<(keyfile::Address, Vec<u8>)> = Vec::new();
    for (i, (address, value)) in pairs.iter().enumerate() {
        if i % 3 == 0 {
            let mut changed = value.clone();
            changed.push(0xEE);
            kv2.put(*address, &changed)?;
            expected.push((*address, changed));
        } else {
            expected.push((*address, value.clone()));
        }
    }

    kv2.close()?;
    let mut kv2 = KV2::load(&path, small_config())?;
    for (address, value) in &expected {
        assert_eq!(kv2.get(address)?.as_deref(), Some(value.as_slice()));
    }
    Ok(())
}
