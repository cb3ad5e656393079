//! In-process shard store.
//!
//! Holds channel subscriptions for a single connection and a JSON tree of data with
//! lazily enforced expiry. Latency and outages can be injected to exercise the
//! coordination layer under slow or failing stores.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

use super::connection::ShardConnection;
use super::types::{Publication, Query, QueryKind, QueryOptions, ShardMessage};
use crate::error::{ClusterError, Result};
use crate::routing::types::ShardId;

const MESSAGE_CAPACITY: usize = 1024;

/// Call counters, readable while the shard is in use.
#[derive(Debug, Default)]
pub struct ShardStats {
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
    publishes: AtomicUsize,
    delivered: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ShardStatsSnapshot {
    pub subscribes: usize,
    pub unsubscribes: usize,
    pub publishes: usize,
    pub delivered: usize,
}

impl ShardStats {
    pub fn snapshot(&self) -> ShardStatsSnapshot {
        ShardStatsSnapshot {
            subscribes: self.subscribes.load(Ordering::SeqCst),
            unsubscribes: self.unsubscribes.load(Ordering::SeqCst),
            publishes: self.publishes.load(Ordering::SeqCst),
            delivered: self.delivered.load(Ordering::SeqCst),
        }
    }
}

pub struct MemoryShard {
    id: ShardId,
    address: String,
    subscriptions: DashSet<String>,
    data: Mutex<Value>,
    expiries: DashMap<Vec<String>, Instant>,
    messages: broadcast::Sender<ShardMessage>,
    available: watch::Sender<bool>,
    latency_ms: AtomicU64,
    /// Channels whose next subscribes fail, with the remaining failure count.
    failing_subscribes: DashMap<String, usize>,
    stats: ShardStats,
}

impl MemoryShard {
    pub fn new(id: ShardId, address: impl Into<String>) -> Arc<Self> {
        let (messages, _) = broadcast::channel(MESSAGE_CAPACITY);
        let (available, _) = watch::channel(true);
        Arc::new(Self {
            id,
            address: address.into(),
            subscriptions: DashSet::new(),
            data: Mutex::new(Value::Object(Map::new())),
            expiries: DashMap::new(),
            messages,
            available,
            latency_ms: AtomicU64::new(0),
            failing_subscribes: DashMap::new(),
            stats: ShardStats::default(),
        })
    }

    /// One in-process shard per address, ids in address order.
    pub fn for_addresses(addresses: &[String]) -> Vec<Arc<Self>> {
        addresses
            .iter()
            .enumerate()
            .map(|(index, address)| Self::new(ShardId(index), address.clone()))
            .collect()
    }

    pub fn stats(&self) -> ShardStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn subscribed_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.subscriptions.iter().map(|c| c.clone()).collect();
        channels.sort();
        channels
    }

    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Simulates the connection going down (voiding its subscriptions) or coming back.
    pub fn set_available(&self, available: bool) {
        if !available {
            self.subscriptions.clear();
        }
        self.available.send_replace(available);
    }

    /// Makes the next `times` subscribes to `channel` fail.
    pub fn fail_subscribes(&self, channel: &str, times: usize) {
        self.failing_subscribes.insert(channel.to_string(), times);
    }

    async fn enter(&self) -> Result<()> {
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if *self.available.borrow() {
            Ok(())
        } else {
            Err(ClusterError::ConnectionClosed { shard: self.id })
        }
    }

    fn take_injected_failure(&self, channel: &str) -> bool {
        let mut failed = false;
        self.failing_subscribes.remove_if_mut(channel, |_, remaining| {
            failed = *remaining > 0;
            *remaining = remaining.saturating_sub(1);
            *remaining == 0
        });
        failed
    }

    fn purge_expired(&self, root: &mut Value) {
        let now = Instant::now();
        let expired: Vec<Vec<String>> = self
            .expiries
            .iter()
            .filter(|entry| *entry.value() <= now)
            .map(|entry| entry.key().clone())
            .collect();
        for path in expired {
            self.expiries.remove(&path);
            remove_at(root, &path);
            tracing::trace!("Shard {} expired key {:?}", self.id, path);
        }
    }

    fn with_data<T>(&self, f: impl FnOnce(&mut Value) -> T) -> T {
        let mut root = self.data.lock();
        self.purge_expired(&mut *root);
        f(&mut *root)
    }
}

#[async_trait]
impl ShardConnection for MemoryShard {
    fn id(&self) -> ShardId {
        self.id
    }

    fn address(&self) -> &str {
        &self.address
    }

    async fn ready(&self) -> Result<()> {
        let mut available = self.available.subscribe();
        available
            .wait_for(|up| *up)
            .await
            .map_err(|_| ClusterError::ConnectionClosed { shard: self.id })?;
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<ShardMessage> {
        self.messages.subscribe()
    }

    async fn subscribe(&self, channel: &str) -> Result<()> {
        self.stats.subscribes.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        if self.take_injected_failure(channel) {
            return Err(ClusterError::Shard {
                shard: self.id,
                message: format!("subscribe to {} rejected", channel),
            });
        }
        self.subscriptions.insert(channel.to_string());
        tracing::trace!("Shard {} subscribed to {}", self.id, channel);
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.stats.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        self.subscriptions.remove(channel);
        Ok(())
    }

    async fn unsubscribe_all(&self) -> Result<()> {
        self.enter().await?;
        self.subscriptions.clear();
        Ok(())
    }

    async fn publish(&self, channel: &str, publication: Publication) -> Result<()> {
        self.stats.publishes.fetch_add(1, Ordering::SeqCst);
        self.enter().await?;
        if self.subscriptions.contains(channel) {
            let message = ShardMessage {
                channel: channel.to_string(),
                publication,
            };
            if self.messages.send(message).is_ok() {
                self.stats.delivered.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn is_subscribed(&self, channel: &str) -> Result<bool> {
        self.enter().await?;
        Ok(self.subscriptions.contains(channel))
    }

    async fn set(&self, key: &[String], value: Value) -> Result<()> {
        self.enter().await?;
        self.expiries.remove(key);
        self.with_data(|root| *lookup_or_create(root, key) = value);
        Ok(())
    }

    async fn add(&self, key: &[String], value: Value) -> Result<()> {
        self.enter().await?;
        self.with_data(|root| {
            let slot = lookup_or_create(root, key);
            if slot.is_null() {
                *slot = Value::Array(vec![value]);
                return Ok(());
            }
            match slot {
                Value::Array(items) => {
                    items.push(value);
                    Ok(())
                }
                _ => Err(ClusterError::Data(format!(
                    "cannot add to non-array value at {}",
                    key.join(".")
                ))),
            }
        })
    }

    async fn get(&self, key: &[String]) -> Result<Option<Value>> {
        self.enter().await?;
        Ok(self.with_data(|root| lookup(root, key).cloned()))
    }

    async fn count(&self, key: &[String]) -> Result<usize> {
        self.enter().await?;
        Ok(self.with_data(|root| lookup(root, key).map_or(0, count_of)))
    }

    async fn has_key(&self, key: &[String]) -> Result<bool> {
        self.enter().await?;
        Ok(self.with_data(|root| lookup(root, key).is_some()))
    }

    async fn remove(&self, key: &[String]) -> Result<Option<Value>> {
        self.enter().await?;
        self.expiries.remove(key);
        Ok(self.with_data(|root| remove_at(root, key)))
    }

    async fn pop(&self, key: &[String]) -> Result<Option<Value>> {
        self.enter().await?;
        Ok(self.with_data(|root| match lookup_mut(root, key) {
            Some(Value::Array(items)) => items.pop(),
            _ => None,
        }))
    }

    async fn get_range(&self, key: &[String], from: usize, to: Option<usize>) -> Result<Option<Value>> {
        self.enter().await?;
        self.with_data(|root| match lookup(root, key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => {
                let range = clamp_range(items.len(), from, to);
                Ok(Some(Value::Array(items[range].to_vec())))
            }
            Some(_) => Err(not_an_array(key)),
        })
    }

    async fn remove_range(&self, key: &[String], from: usize, to: Option<usize>) -> Result<Option<Value>> {
        self.enter().await?;
        self.with_data(|root| match lookup_mut(root, key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => {
                let range = clamp_range(items.len(), from, to);
                Ok(Some(Value::Array(items.drain(range).collect())))
            }
            Some(_) => Err(not_an_array(key)),
        })
    }

    async fn splice(&self, key: &[String], index: usize, count: usize, items: Vec<Value>) -> Result<Value> {
        self.enter().await?;
        self.with_data(|root| {
            let slot = lookup_or_create(root, key);
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            match slot {
                Value::Array(existing) => {
                    let start = index.min(existing.len());
                    let end = start.saturating_add(count).min(existing.len());
                    Ok(Value::Array(existing.splice(start..end, items).collect()))
                }
                _ => Err(not_an_array(key)),
            }
        })
    }

    async fn expire(&self, keys: &[Vec<String>], seconds: u64) -> Result<()> {
        self.enter().await?;
        let deadline = Instant::now() + Duration::from_secs(seconds);
        for key in keys {
            self.expiries.insert(key.clone(), deadline);
        }
        Ok(())
    }

    async fn unexpire(&self, keys: &[Vec<String>]) -> Result<()> {
        self.enter().await?;
        for key in keys {
            self.expiries.remove(key);
        }
        Ok(())
    }

    async fn run(&self, query: &Query, options: &QueryOptions) -> Result<Value> {
        self.enter().await?;
        let mut path = options.base_key.clone();
        path.extend(query.path.iter().cloned());
        Ok(self.with_data(|root| {
            let target = lookup(root, &path);
            match query.kind {
                QueryKind::Get => target.cloned().unwrap_or(Value::Null),
                QueryKind::Count => Value::from(target.map_or(0, count_of)),
                QueryKind::Keys => match target {
                    Some(Value::Object(map)) => {
                        Value::Array(map.keys().cloned().map(Value::String).collect())
                    }
                    _ => Value::Array(Vec::new()),
                },
            }
        }))
    }
}

fn clamp_range(len: usize, from: usize, to: Option<usize>) -> std::ops::Range<usize> {
    let end = to.unwrap_or(len).min(len);
    from.min(end)..end
}

fn not_an_array(key: &[String]) -> ClusterError {
    ClusterError::Data(format!("value at {} is not an array", key.join(".")))
}

fn count_of(value: &Value) -> usize {
    match value {
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Null => 0,
        _ => 1,
    }
}

fn child<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Value, segment: &str) -> Option<&'a mut Value> {
    match value {
        Value::Object(map) => map.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

fn lookup<'a>(root: &'a Value, path: &[String]) -> Option<&'a Value> {
    path.iter()
        .try_fold(root, |node, segment| child(node, segment))
}

fn lookup_mut<'a>(root: &'a mut Value, path: &[String]) -> Option<&'a mut Value> {
    path.iter()
        .try_fold(root, |node, segment| child_mut(node, segment))
}

/// Walks `path`, replacing anything that is not an object with one.
fn lookup_or_create<'a>(root: &'a mut Value, path: &[String]) -> &'a mut Value {
    path.iter().fold(root, |node, segment| {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        match node {
            Value::Object(map) => map.entry(segment.clone()).or_insert(Value::Null),
            _ => unreachable!("node was just made an object"),
        }
    })
}

fn remove_at(root: &mut Value, path: &[String]) -> Option<Value> {
    let (last, parent_path) = path.split_last()?;
    match lookup_mut(root, parent_path)? {
        Value::Object(map) => map.remove(last),
        Value::Array(items) => {
            let index = last.parse::<usize>().ok()?;
            (index < items.len()).then(|| items.remove(index))
        }
        _ => None,
    }
}
