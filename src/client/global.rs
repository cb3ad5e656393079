//! Instance-wide client: channel handles, publishing, watchers and global data.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::broadcast;

use super::channel::{ChannelHandle, HandleCache};
use super::types::ChannelEvent;
use crate::error::Result;
use crate::events::FaultBoundary;
use crate::routing::keys::KeyManager;
use crate::routing::types::{Mapper, Operation, Route, RoutingKey};
use crate::shard::pool::ClientCluster;
use crate::shard::types::{Publication, Query, QueryOptions};
use crate::subscription::registry::SubscriptionRegistry;
use crate::subscription::types::{SocketId, WatchHandler};

const CLIENT_EVENT_CAPACITY: usize = 256;

/// Namespaced data access on the shared store. Keys are dotted paths
/// (`"users.42.name"`) relative to the global data root.
#[async_trait]
pub trait DataClient: Send + Sync {
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Appends to the list at `key`, creating it if missing.
    async fn add(&self, key: &str, value: Value) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// The whole global data tree.
    async fn get_all(&self) -> Result<Value>;

    async fn count(&self, key: &str) -> Result<usize>;

    async fn has_key(&self, key: &str) -> Result<bool>;

    async fn remove(&self, key: &str) -> Result<Option<Value>>;

    async fn remove_all(&self) -> Result<()>;

    async fn pop(&self, key: &str) -> Result<Option<Value>>;

    /// Elements `from..to` of the list at `key`; `None` reads to the end.
    async fn get_range(&self, key: &str, from: usize, to: Option<usize>) -> Result<Option<Value>>;

    async fn remove_range(&self, key: &str, from: usize, to: Option<usize>) -> Result<Option<Value>>;

    /// Replaces `count` elements at `index` with `items`; returns what was removed.
    async fn splice(&self, key: &str, index: usize, count: usize, items: Vec<Value>) -> Result<Value>;

    async fn expire(&self, keys: &[&str], seconds: u64) -> Result<()>;

    async fn unexpire(&self, keys: &[&str]) -> Result<()>;

    /// Runs `query` relative to the global data root.
    async fn query(&self, query: &Query) -> Result<Value>;
}

#[derive(Clone)]
pub struct GlobalClient {
    registry: Arc<SubscriptionRegistry>,
    public: Arc<ClientCluster>,
    keys: KeyManager,
    channels: Arc<HandleCache>,
    events: broadcast::Sender<ChannelEvent>,
    faults: FaultBoundary,
}

impl GlobalClient {
    pub fn new(registry: Arc<SubscriptionRegistry>, public: Arc<ClientCluster>, faults: FaultBoundary) -> Self {
        let (events, _) = broadcast::channel(CLIENT_EVENT_CAPACITY);
        Self {
            registry,
            public,
            keys: KeyManager::new(),
            channels: Arc::new(HandleCache::new()),
            events,
            faults,
        }
    }

    /// Channel lifecycle events of every handle created by this client.
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    /// Cached handle for `name`, created unsubscribed on first use.
    pub fn channel(&self, name: &str) -> Arc<ChannelHandle> {
        self.channels
            .entry(name.to_string())
            .or_insert_with(|| {
                ChannelHandle::new(
                    name,
                    self.registry.clone(),
                    self.events.clone(),
                    Arc::downgrade(&self.channels),
                    &self.faults,
                )
            })
            .clone()
    }

    pub fn subscribe(&self, name: &str) -> Arc<ChannelHandle> {
        let handle = self.channel(name);
        handle.subscribe();
        handle
    }

    pub fn unsubscribe(&self, name: &str) {
        if let Some(handle) = self.existing(name) {
            handle.unsubscribe();
        }
    }

    pub fn destroy_channel(&self, name: &str) {
        if let Some(handle) = self.existing(name) {
            handle.destroy();
        }
    }

    fn existing(&self, name: &str) -> Option<Arc<ChannelHandle>> {
        self.channels.get(name).map(|handle| handle.value().clone())
    }

    pub fn is_subscribed(&self, name: &str, include_pending: bool) -> bool {
        self.existing(name)
            .is_some_and(|handle| handle.is_subscribed(include_pending))
    }

    pub fn subscriptions(&self, include_pending: bool) -> Vec<String> {
        let mut names: Vec<String> = self
            .channels
            .iter()
            .filter(|entry| entry.value().is_subscribed(include_pending))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub async fn publish(&self, channel: &str, data: Value) -> Result<()> {
        self.registry
            .publish(channel, Publication::new(data))
            .await
    }

    /// Publishes without echoing the message back to socket `exclude`.
    pub async fn publish_excluding(&self, channel: &str, data: Value, exclude: &SocketId) -> Result<()> {
        self.registry
            .publish(channel, Publication::excluding(data, exclude.as_str()))
            .await
    }

    pub fn watch(&self, channel: &str, handler: WatchHandler) {
        self.registry.watch(channel, handler);
    }

    pub fn unwatch(&self, channel: Option<&str>, handler: Option<&WatchHandler>) {
        self.registry.unwatch(channel, handler);
    }

    pub fn watchers(&self, channel: &str) -> Vec<WatchHandler> {
        self.registry.watchers(channel)
    }

    pub fn set_mapper(&self, mapper: Mapper) {
        self.public.set_mapper(mapper);
    }

    pub fn get_mapper(&self) -> Mapper {
        self.public.get_mapper()
    }

    pub fn map(&self, key: &RoutingKey, operation: Operation) -> Route {
        self.public.map(key, operation)
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    fn localize(&self, key: Option<&str>) -> Vec<String> {
        self.keys.global_data_key(key)
    }

    fn localize_all(&self, keys: &[&str]) -> Vec<Vec<String>> {
        keys.iter().map(|key| self.localize(Some(key))).collect()
    }
}

#[async_trait]
impl DataClient for GlobalClient {
    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.public.set(&self.localize(Some(key)), value).await
    }

    async fn add(&self, key: &str, value: Value) -> Result<()> {
        self.public.add(&self.localize(Some(key)), value).await
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.public.get(&self.localize(Some(key))).await
    }

    async fn get_all(&self) -> Result<Value> {
        let root = self.public.get(&self.localize(None)).await?;
        Ok(root.unwrap_or_else(|| json!({})))
    }

    async fn count(&self, key: &str) -> Result<usize> {
        self.public.count(&self.localize(Some(key))).await
    }

    async fn has_key(&self, key: &str) -> Result<bool> {
        self.public.has_key(&self.localize(Some(key))).await
    }

    async fn remove(&self, key: &str) -> Result<Option<Value>> {
        self.public.remove(&self.localize(Some(key))).await
    }

    async fn remove_all(&self) -> Result<()> {
        self.public.set(&self.localize(None), json!({})).await
    }

    async fn pop(&self, key: &str) -> Result<Option<Value>> {
        self.public.pop(&self.localize(Some(key))).await
    }

    async fn get_range(&self, key: &str, from: usize, to: Option<usize>) -> Result<Option<Value>> {
        self.public.get_range(&self.localize(Some(key)), from, to).await
    }

    async fn remove_range(&self, key: &str, from: usize, to: Option<usize>) -> Result<Option<Value>> {
        self.public
            .remove_range(&self.localize(Some(key)), from, to)
            .await
    }

    async fn splice(&self, key: &str, index: usize, count: usize, items: Vec<Value>) -> Result<Value> {
        self.public
            .splice(&self.localize(Some(key)), index, count, items)
            .await
    }

    async fn expire(&self, keys: &[&str], seconds: u64) -> Result<()> {
        self.public.expire(&self.localize_all(keys), seconds).await
    }

    async fn unexpire(&self, keys: &[&str]) -> Result<()> {
        self.public.unexpire(&self.localize_all(keys)).await
    }

    async fn query(&self, query: &Query) -> Result<Value> {
        let options = QueryOptions {
            base_key: self.localize(None),
        };
        self.public.run(query, &options).await
    }
}
