mod helpers;
mod kv2_tests;
mod shard_tests;
