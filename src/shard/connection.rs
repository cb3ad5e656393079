use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::types::{Publication, Query, QueryOptions, ShardMessage};
use crate::error::Result;
use crate::routing::types::ShardId;

/// A connection to a single backend store.
///
/// Subscriptions are per connection: a store only delivers messages for channels this
/// connection subscribed to, and voids them all if the connection drops.
#[async_trait]
pub trait ShardConnection: Send + Sync {
    fn id(&self) -> ShardId;

    fn address(&self) -> &str;

    /// Resolves once the store accepts requests.
    async fn ready(&self) -> Result<()>;

    /// Stream of messages for subscribed channels.
    fn messages(&self) -> broadcast::Receiver<ShardMessage>;

    async fn subscribe(&self, channel: &str) -> Result<()>;

    async fn unsubscribe(&self, channel: &str) -> Result<()>;

    async fn unsubscribe_all(&self) -> Result<()>;

    async fn publish(&self, channel: &str, publication: Publication) -> Result<()>;

    async fn is_subscribed(&self, channel: &str) -> Result<bool>;

    async fn set(&self, key: &[String], value: Value) -> Result<()>;

    /// Appends `value` to the array at `key`.
    async fn add(&self, key: &[String], value: Value) -> Result<()>;

    async fn get(&self, key: &[String]) -> Result<Option<Value>>;

    async fn count(&self, key: &[String]) -> Result<usize>;

    async fn has_key(&self, key: &[String]) -> Result<bool>;

    async fn remove(&self, key: &[String]) -> Result<Option<Value>>;

    /// Removes and returns the last element of the array at `key`.
    async fn pop(&self, key: &[String]) -> Result<Option<Value>>;

    /// Elements `from..to` of the array at `key`; `to` defaults to the end.
    async fn get_range(&self, key: &[String], from: usize, to: Option<usize>) -> Result<Option<Value>>;

    /// Removes elements `from..to` of the array at `key` and returns them.
    async fn remove_range(&self, key: &[String], from: usize, to: Option<usize>) -> Result<Option<Value>>;

    /// Replaces `count` elements at `index` with `items`, returning the removed ones.
    /// A missing array is created.
    async fn splice(&self, key: &[String], index: usize, count: usize, items: Vec<Value>) -> Result<Value>;

    async fn expire(&self, keys: &[Vec<String>], seconds: u64) -> Result<()>;

    async fn unexpire(&self, keys: &[Vec<String>]) -> Result<()>;

    async fn run(&self, query: &Query, options: &QueryOptions) -> Result<Value>;
}
