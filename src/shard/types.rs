use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload carried through a shard from publisher to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Publication {
    pub data: Value,
    /// Socket that must not receive its own publish back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<String>,
}

impl Publication {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            exclude: None,
        }
    }

    pub fn excluding(data: Value, socket_id: impl Into<String>) -> Self {
        Self {
            data,
            exclude: Some(socket_id.into()),
        }
    }
}

/// A message a shard delivers for a channel this connection subscribed to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShardMessage {
    pub channel: String,
    pub publication: Publication,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum QueryKind {
    /// The value at the path.
    Get,
    /// Number of entries at the path.
    Count,
    /// Keys of the object at the path.
    Keys,
}

/// A read query evaluated by a store relative to `QueryOptions::base_key`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Query {
    pub kind: QueryKind,
    #[serde(default)]
    pub path: Vec<String>,
    /// Pins the query to the shard owning this value.
    #[serde(default)]
    pub map_index: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    pub base_key: Vec<String>,
}
