//! Subscription Module
//!
//! Reference-counts channel interest so each channel holds at most one shard-level
//! subscription, no matter how many sockets or global subscribers want it.
//!
//! ## Core Concepts
//! - **Global subscription**: the coordination layer's own interest in a channel
//!   (`Pending` while the shard has not acknowledged, then `Active`).
//! - **Local subscribers**: sockets bound to this instance that want a channel.
//! - **Shard link**: the single shard subscription behind a channel. It exists exactly
//!   while the channel has global interest or at least one local subscriber, and every
//!   release of interest goes through `drop_unused_subscriptions`.
//! - **Socket binding**: per-socket channel bookkeeping with a channel ceiling, sequential
//!   request handling and a kick-out capability.

pub mod registry;
pub mod socket;
pub mod types;
