//! Shard Pool Module
//!
//! The boundary to the backend key/value-and-pubsub stores.
//!
//! ## Core Concepts
//! - **`ShardConnection`**: one live connection to one store. Everything the coordination
//!   layer needs from a store goes through this trait.
//! - **`ClientCluster`**: a pool over every connection that routes each call through a
//!   swappable mapper and fans it out to the selected shard(s).
//! - **`MemoryShard`**: an in-process store used for local runs and tests.

pub mod connection;
pub mod memory;
pub mod pool;
pub mod types;
