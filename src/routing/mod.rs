//! Shard Routing Module
//!
//! Decides which backend shard(s) serve a given operation.
//!
//! ## Core Concepts
//! - **Mapper**: a pure function of `(key, operation, shard ids)` returning one shard or a
//!   broadcast set. Mappers may run concurrently for unrelated operations and must not
//!   have side effects.
//! - **Private mapping**: channel traffic and per-key data are spread across every shard
//!   with a stable 32-bit rolling hash, so a channel always lands on the same shard.
//! - **Public mapping**: globally shared data lives on shard 0.
//! - **Key localization**: `KeyManager` namespaces data keys before they reach a shard.

pub mod keys;
pub mod mapper;
pub mod types;

#[cfg(test)]
mod tests;
