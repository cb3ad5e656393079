use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{ClusterError, Result};

/// Identifier a client socket presents at handshake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub String);

impl SocketId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum GlobalSubscription {
    /// Waiting for the shard to acknowledge.
    Pending,
    Active,
}

/// What a socket receives for each message on a channel it holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelPacket {
    pub channel: String,
    pub data: Value,
}

/// Sent to a socket that is forcibly removed from a channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KickOutNotice {
    pub message: String,
    pub channel: String,
}

/// Callback run for every message on a watched channel.
pub type WatchHandler = Arc<dyn Fn(&Value) + Send + Sync>;

/// A client connection as seen by the coordination layer.
pub trait Socket: Send + Sync {
    /// `None` means the handshake produced no usable identifier.
    fn id(&self) -> Option<SocketId>;

    fn emit_raw(&self, packet: &ChannelPacket);

    fn kick_out(&self, notice: &KickOutNotice);
}

/// Reply side of a socket-level subscribe/unsubscribe request.
pub trait Responder: Send {
    fn end(self);

    fn error(self, err: &ClusterError);
}

impl Responder for tokio::sync::oneshot::Sender<Result<()>> {
    fn end(self) {
        let _ = self.send(Ok(()));
    }

    fn error(self, err: &ClusterError) {
        let _ = self.send(Err(err.clone()));
    }
}

/// Channels a bound socket holds. The count is what the channel ceiling applies to.
#[derive(Debug, Default)]
pub struct SocketSubscriptionState {
    channels: HashSet<String>,
}

impl SocketSubscriptionState {
    pub fn contains(&self, channel: &str) -> bool {
        self.channels.contains(channel)
    }

    pub fn count(&self) -> usize {
        self.channels.len()
    }

    pub(crate) fn insert(&mut self, channel: &str) -> bool {
        self.channels.insert(channel.to_string())
    }

    pub(crate) fn remove(&mut self, channel: &str) -> bool {
        self.channels.remove(channel)
    }

    /// Held channels in a stable order.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.channels.iter().cloned().collect();
        channels.sort();
        channels
    }
}
