use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use engine::{Address, KFileConfig, KVShard, ShardConfig, KV};
use tempfile::tempdir;
use testutil::FastRandom;

const N_KEYS: usize = 10_000;
const VALUE_SIZE: usize = 100;

fn bench_kfile_config() -> KFileConfig {
    KFileConfig {
        offsets_count: 256,
        key_limit: 1_000_000,
        max_cached_blocks: 50,
        bloom_size_mb: 0.25,
    }
}

fn bench_pairs() -> Vec<(Address, Vec<u8>)> {
    let mut fr = FastRandom::new(b"bench");
    (0..N_KEYS)
        .map(|_| (fr.next_hash(), fr.rand_buff(VALUE_SIZE, VALUE_SIZE)))
        .collect()
}

fn kv_put_benchmark(c: &mut Criterion) {
    c.bench_function("kv_put_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let kv = KV::create(dir.path().join("kv"), false, bench_kfile_config()).unwrap();
                (dir, kv, bench_pairs())
            },
            |(_dir, mut kv, pairs)| {
                for (address, value) in &pairs {
                    kv.put(*address, value).unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn kv_get_hit_benchmark(c: &mut Criterion) {
    c.bench_function("kv_get_hit_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let mut kv =
                    KV::create(dir.path().join("kv"), false, bench_kfile_config()).unwrap();
                let pairs = bench_pairs();
                for (address, value) in &pairs {
                    kv.put(*address, value).unwrap();
                }
                kv.close().unwrap();
                kv.open().unwrap();
                (dir, kv, pairs)
            },
            |(_dir, mut kv, pairs)| {
                for (address, _) in &pairs {
                    assert!(kv.get(address).unwrap().is_some());
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn shard_put_benchmark(c: &mut Criterion) {
    c.bench_function("kvshard_put_10k", |b| {
        b.iter_batched(
            || {
                let dir = tempdir().unwrap();
                let config = ShardConfig {
                    num_shards: 16,
                    compress_after: u64::MAX,
                    kfile: bench_kfile_config(),
                };
                let store = KVShard::create(dir.path().join("store"), config).unwrap();
                (dir, store, bench_pairs())
            },
            |(_dir, store, pairs)| {
                for (address, value) in &pairs {
                    store.put(*address, value).unwrap();
                }
            },
            BatchSize::LargeInput,
        );
    });
}

criterion_group!(
    benches,
    kv_put_benchmark,
    kv_get_hit_benchmark,
    shard_put_benchmark
);
criterion_main!(benches);
