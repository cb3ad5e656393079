use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Index of a shard in the configured store list.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShardId(pub usize);

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation names the pool hands to its mapper.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    Publish,
    Subscribe,
    Unsubscribe,
    IsSubscribed,
    Query,
    Run,
    Get,
    Set,
    Add,
    Remove,
    Count,
    HasKey,
    Pop,
    GetRange,
    RemoveRange,
    Splice,
    Expire,
    Unexpire,
}

impl Operation {
    /// Channel operations broadcast when no key is given.
    pub fn is_channel_op(self) -> bool {
        matches!(
            self,
            Operation::Publish
                | Operation::Subscribe
                | Operation::Unsubscribe
                | Operation::IsSubscribed
        )
    }

    pub fn is_query(self) -> bool {
        matches!(self, Operation::Query | Operation::Run)
    }
}

/// The key an operation is routed by. Computed per call, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingKey {
    Absent,
    /// A channel name or plain string key.
    Name(String),
    /// A query spec, optionally pinned to the shard owning `map_index`.
    Query { map_index: Option<String> },
    /// An ordered key path. The segment at index 2 is the shard hint.
    Path(Vec<String>),
}

impl RoutingKey {
    pub fn is_absent(&self) -> bool {
        matches!(self, RoutingKey::Absent)
    }

    /// String fed to the hash when the key itself is hashed.
    pub fn hash_input(&self) -> Option<String> {
        match self {
            RoutingKey::Absent => None,
            RoutingKey::Name(name) => Some(name.clone()),
            RoutingKey::Query { map_index } => map_index.clone(),
            RoutingKey::Path(path) => Some(path.join(".")),
        }
    }
}

impl From<&str> for RoutingKey {
    fn from(value: &str) -> Self {
        RoutingKey::Name(value.to_string())
    }
}

impl From<Option<&str>> for RoutingKey {
    fn from(value: Option<&str>) -> Self {
        value.map_or(RoutingKey::Absent, RoutingKey::from)
    }
}

/// Where an operation goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Route {
    One(ShardId),
    All(Vec<ShardId>),
}

impl Route {
    pub fn shards(&self) -> Vec<ShardId> {
        match self {
            Route::One(id) => vec![*id],
            Route::All(ids) => ids.clone(),
        }
    }
}

/// Swappable routing function held by a shard pool.
pub type Mapper = Arc<dyn Fn(&RoutingKey, Operation, &[ShardId]) -> Route + Send + Sync>;
