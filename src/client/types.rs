use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ChannelState {
    Unsubscribed,
    Pending,
    Subscribed,
}

/// Lifecycle notifications of a channel handle. Emitted on the handle's own stream
/// and on its global client's stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Subscribe(String),
    SubscribeFail { channel: String, error: ClusterError },
    Unsubscribe(String),
}

impl ChannelEvent {
    pub fn channel(&self) -> &str {
        match self {
            ChannelEvent::Subscribe(channel) | ChannelEvent::Unsubscribe(channel) => channel,
            ChannelEvent::SubscribeFail { channel, .. } => channel,
        }
    }
}
