//! Built-in mappers.
//!
//! The hash is the 32-bit signed rolling hash (`h = h * 31 + unit`) over UTF-16 code
//! units with wrapping arithmetic. It must stay bit-for-bit stable: existing
//! deployments place channels on shards with it.

use super::types::{Mapper, Operation, Route, RoutingKey, ShardId};
use std::sync::Arc;

/// Raw 32-bit rolling hash of `input`.
pub fn rolling_hash(input: &str) -> i32 {
    input.encode_utf16().fold(0i32, |hash, unit| {
        hash.wrapping_shl(5)
            .wrapping_sub(hash)
            .wrapping_add(unit as i32)
    })
}

/// Shard index for `input` among `shard_count` shards. Empty input maps to 0.
pub fn hash_key(input: &str, shard_count: usize) -> usize {
    if input.is_empty() || shard_count == 0 {
        return 0;
    }
    let hash = (rolling_hash(input) as i64).unsigned_abs();
    (hash % shard_count as u64) as usize
}

fn hashed(input: &str, shard_ids: &[ShardId]) -> Route {
    Route::One(ShardId(hash_key(input, shard_ids.len())))
}

/// Per-key mapper used for channel traffic and per-key data.
pub fn private_mapper(key: &RoutingKey, operation: Operation, shard_ids: &[ShardId]) -> Route {
    if operation.is_channel_op() {
        return match key.hash_input() {
            None => Route::All(shard_ids.to_vec()),
            Some(input) => hashed(&input, shard_ids),
        };
    }

    if operation.is_query() {
        return match key {
            RoutingKey::Query {
                map_index: Some(index),
            } if !index.is_empty() => hashed(index, shard_ids),
            _ => Route::One(ShardId(0)),
        };
    }

    match key {
        RoutingKey::Path(path) => match path.get(2) {
            Some(hint) => hashed(hint, shard_ids),
            None => Route::All(shard_ids.to_vec()),
        },
        other => hashed(&other.hash_input().unwrap_or_default(), shard_ids),
    }
}

/// Mapper for publicly shared data: everything lives on shard 0.
pub fn public_mapper(_key: &RoutingKey, _operation: Operation, _shard_ids: &[ShardId]) -> Route {
    Route::One(ShardId(0))
}

pub fn private() -> Mapper {
    Arc::new(private_mapper)
}

pub fn public() -> Mapper {
    Arc::new(public_mapper)
}
