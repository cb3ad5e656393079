//! Gateway Protocol
//!
//! Endpoints and Data Transfer Objects of the admin HTTP surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::routing::types::ShardId;

// --- API Endpoints ---

pub const ENDPOINT_PUBLISH: &str = "/publish";
pub const ENDPOINT_SUBSCRIBE: &str = "/subscribe";
pub const ENDPOINT_UNSUBSCRIBE: &str = "/unsubscribe";
/// Lists global subscriptions; `?pending=true` includes unacknowledged ones.
pub const ENDPOINT_SUBSCRIPTIONS: &str = "/subscriptions";
pub const ENDPOINT_ROUTE: &str = "/route/:channel";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PublishRequest {
    pub channel: String,
    pub data: Value,
    /// Socket id that must not receive this message.
    #[serde(default)]
    pub exclude: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChannelRequest {
    pub channel: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct AckResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SubscriptionsQuery {
    #[serde(default)]
    pub pending: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SubscriptionsResponse {
    pub channels: Vec<String>,
}

/// Shards a channel's traffic goes to under the private mapper.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct RouteResponse {
    pub channel: String,
    pub shards: Vec<ShardId>,
}
