//! Client Module
//!
//! Public surface of the coordination layer.
//!
//! ## Core Concepts
//! - **`IoClusterClient`**: owns the shard pools, the subscription registry and the socket
//!   binder. Transports bind sockets to it; the application publishes through it.
//! - **`GlobalClient`**: instance-wide publish, channel handles, watchers and namespaced
//!   data access routed through the public mapper.
//! - **`ChannelHandle`**: per-channel state machine (`Unsubscribed`, `Pending`,
//!   `Subscribed`) whose registry calls are serialized in request order.

pub mod channel;
pub mod cluster_client;
pub mod global;
pub mod types;

#[cfg(test)]
mod tests;
