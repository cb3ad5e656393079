//! HTTP Gateway Module
//!
//! Small admin surface over an [`IoClusterClient`](crate::client::cluster_client::IoClusterClient):
//! publish to a channel, manage the instance's global subscriptions and inspect where a
//! channel is routed.

pub mod handlers;
pub mod protocol;
