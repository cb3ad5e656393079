//! Error taxonomy for the coordination layer.
//!
//! Every failure that crosses a public API boundary is a [`ClusterError`].
//! Errors are `Clone` so the outcome of a single in-flight shard subscribe can
//! be handed to every caller that joined it.

use std::time::Duration;

use thiserror::Error;

use crate::routing::types::ShardId;

pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ClusterError {
    /// The socket presented no usable identifier.
    #[error("Failed handshake - Invalid handshake data")]
    Handshake,

    #[error("Socket {socket} tried to exceed the channel subscription limit of {limit}")]
    ChannelLimit { socket: String, limit: usize },

    #[error("shard {shard} failed: {message}")]
    Shard { shard: ShardId, message: String },

    /// The connection to a shard is gone. The shard voids its subscriptions
    /// for that connection on its own.
    #[error("connection to shard {shard} is closed")]
    ConnectionClosed { shard: ShardId },

    #[error("shard {id} at address {address} exited ({status})")]
    ShardExited {
        id: ShardId,
        address: String,
        status: String,
    },

    #[error("failed to launch shard at address {address}: {message}")]
    Launch { address: String, message: String },

    #[error("subscribe to channel {channel} was not acknowledged within {after:?}")]
    SubscribeTimeout { channel: String, after: Duration },

    #[error("shards did not become ready within {after:?}")]
    ConnectTimeout { after: Duration },

    #[error("socket {socket} is already bound")]
    SocketAlreadyBound { socket: String },

    #[error("socket {socket} is no longer bound")]
    SocketUnbound { socket: String },

    #[error("mapper routed to unknown shard {shard}")]
    UnknownShard { shard: ShardId },

    #[error("data operation failed: {0}")]
    Data(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ClusterError {
    /// Failures explained by normal connection churn. These are reported as
    /// notices instead of operator-facing errors.
    pub fn is_notice(&self) -> bool {
        matches!(
            self,
            ClusterError::ConnectionClosed { .. } | ClusterError::SocketUnbound { .. }
        )
    }

    /// Whether the transport should drop the socket that caused this error.
    pub fn should_drop_socket(&self) -> bool {
        matches!(self, ClusterError::Handshake)
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        ClusterError::Data(err.to_string())
    }
}
