//! Horizontally Scalable Pub/Sub Coordination Library
//!
//! Lets many real-time server instances share channel subscriptions and global data
//! through a set of backend store shards. It serves as the foundation for the binary
//! executable (`main.rs`).
//!
//! ## Architecture Modules
//!
//! - **`routing`**: Maps channels and data keys to shards with a stable rolling hash
//!   (private mapping) or pins them to shard 0 (public mapping).
//! - **`shard`**: The store connection boundary (`ShardConnection`), a routed pool over
//!   all connections (`ClientCluster`) and an in-process store (`MemoryShard`).
//! - **`supervisor`**: Launches one store process per address, signals readiness once
//!   all are up and relaunches any that exit.
//! - **`subscription`**: Reference-counted channel interest. Keeps at most one shard
//!   subscription per channel for any number of sockets and global subscribers.
//! - **`client`**: The public client (`IoClusterClient`), instance-wide channel handles
//!   and namespaced global data access.
//! - **`gateway`**: HTTP admin surface over a client.
//! - **`config`**, **`error`**, **`events`**: Options, the error taxonomy and the
//!   event bus every component reports through.

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod routing;
pub mod shard;
pub mod subscription;
pub mod supervisor;
