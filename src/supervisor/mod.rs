//! Shard Supervision Module
//!
//! Launches one backend store process per configured address and keeps it alive.
//!
//! ## Core Mechanisms
//! - **Launching**: a `ShardLauncher` turns a `ShardSpec` (id, address, shared secret,
//!   expiry accuracy, limits) into a running `ShardProcess`.
//! - **Ready quorum**: `Ready` fires once, after every shard's first successful start.
//!   Relaunches never re-fire it.
//! - **Recovery**: an unexpected exit is reported as a non-fatal `Error` event and the
//!   shard is relaunched in place with the same id and address, without a retry limit.

pub mod launcher;
pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
