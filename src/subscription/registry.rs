//! Channel Subscription Registry
//!
//! Tracks three kinds of per-channel state and keeps them consistent:
//! global interest, locally bound sockets and the single shard link behind them.
//! All mutations for one channel happen under that channel's async lock, so a
//! subscribe and an unsubscribe racing on the same channel always observe each other.

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{OwnedMutexGuard, broadcast::error::RecvError, watch};
use tokio::task::JoinHandle;

use super::types::{ChannelPacket, GlobalSubscription, Socket, SocketId, WatchHandler};
use crate::error::{ClusterError, Result};
use crate::events::EventBus;
use crate::shard::pool::ClientCluster;
use crate::shard::types::{Publication, ShardMessage};

type LinkOutcome = Option<Result<()>>;

/// State of the shard subscription behind a channel.
#[derive(Clone)]
enum ShardLink {
    /// A shard subscribe is in flight; late callers wait for its outcome.
    Pending(watch::Receiver<LinkOutcome>),
    Linked,
}

pub struct SubscriptionRegistry {
    pool: Arc<ClientCluster>,
    global: DashMap<String, GlobalSubscription>,
    local: DashMap<String, HashMap<SocketId, Arc<dyn Socket>>>,
    links: DashMap<String, ShardLink>,
    channel_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    watchers: DashMap<String, Vec<WatchHandler>>,
    subscribe_timeout: Option<Duration>,
    events: EventBus,
    relays: Mutex<Vec<JoinHandle<()>>>,
}

/// Holds a channel lock; forgets the lock entry once nobody else wants it.
struct ChannelGuard<'a> {
    locks: &'a DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    channel: &'a str,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ChannelGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        self.locks
            .remove_if(self.channel, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl SubscriptionRegistry {
    pub fn new(pool: Arc<ClientCluster>, subscribe_timeout: Option<Duration>, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            pool,
            global: DashMap::new(),
            local: DashMap::new(),
            links: DashMap::new(),
            channel_locks: DashMap::new(),
            watchers: DashMap::new(),
            subscribe_timeout,
            events,
            relays: Mutex::new(Vec::new()),
        })
    }

    pub fn pool(&self) -> &Arc<ClientCluster> {
        &self.pool
    }

    /// Starts one relay per shard that fans incoming messages out to local sockets
    /// and watchers. Relays stop when the registry is dropped.
    pub fn start_relay(self: &Arc<Self>) {
        let mut relays = self.relays.lock();
        for shard in self.pool.shards() {
            let mut messages = shard.messages();
            let registry = Arc::downgrade(self);
            let shard_id = shard.id();

            relays.push(tokio::spawn(async move {
                loop {
                    match messages.recv().await {
                        Ok(message) => {
                            let Some(registry) = Weak::upgrade(&registry) else {
                                break;
                            };
                            registry.deliver(&message);
                        }
                        Err(RecvError::Lagged(missed)) => {
                            tracing::warn!(
                                "Relay for shard {} lagged, {} message(s) dropped",
                                shard_id,
                                missed
                            );
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                tracing::debug!("Relay for shard {} stopped", shard_id);
            }));
        }
    }

    async fn lock_channel<'a>(&'a self, channel: &'a str) -> ChannelGuard<'a> {
        let lock = self
            .channel_locks
            .entry(channel.to_string())
            .or_default()
            .clone();
        ChannelGuard {
            locks: &self.channel_locks,
            channel,
            guard: Some(lock.lock_owned().await),
        }
    }

    fn has_interest(&self, channel: &str) -> bool {
        self.global.contains_key(channel)
            || self
                .local
                .get(channel)
                .is_some_and(|sockets| !sockets.is_empty())
    }

    // =========================================================================
    // Shard link
    // =========================================================================

    /// Ensures the shard subscription for `channel` exists. Concurrent callers share
    /// one shard round trip and all receive its outcome.
    async fn link(&self, channel: &str) -> Result<()> {
        let (tx, rx) = watch::channel(None);
        let in_flight = {
            let _guard = self.lock_channel(channel).await;
            match self.links.get(channel).map(|link| link.value().clone()) {
                Some(ShardLink::Linked) => return Ok(()),
                // A closed sender means its owner was cancelled; start over.
                Some(ShardLink::Pending(waiting)) if waiting.has_changed().is_ok() => Some(waiting),
                _ => {
                    self.links
                        .insert(channel.to_string(), ShardLink::Pending(rx));
                    None
                }
            }
        };

        if let Some(waiting) = in_flight {
            return Self::await_link(waiting).await;
        }

        let result = self.shard_subscribe(channel).await;

        {
            let _guard = self.lock_channel(channel).await;
            match &result {
                Ok(()) if self.has_interest(channel) => {
                    self.links.insert(channel.to_string(), ShardLink::Linked);
                }
                Ok(()) => {
                    // Everyone left while the subscribe was in flight.
                    self.links.remove(channel);
                    tracing::debug!("Releasing late subscribe for unused channel {}", channel);
                    if let Err(err) = self.pool.unsubscribe(channel).await {
                        self.events.report(err);
                    }
                }
                Err(_) => {
                    self.links.remove(channel);
                }
            }
        }

        tx.send_replace(Some(result.clone()));
        result
    }

    async fn await_link(mut waiting: watch::Receiver<LinkOutcome>) -> Result<()> {
        match waiting.wait_for(Option::is_some).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(ClusterError::Internal("empty subscribe outcome".to_string()))),
            Err(_) => Err(ClusterError::Internal(
                "shard subscribe was abandoned".to_string(),
            )),
        }
    }

    async fn shard_subscribe(&self, channel: &str) -> Result<()> {
        let Some(after) = self.subscribe_timeout else {
            return self.pool.subscribe(channel).await;
        };

        match tokio::time::timeout(after, self.pool.subscribe(channel)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Subscribe to {} timed out after {:?}", channel, after);
                // Best effort: the shard may still apply the subscribe.
                if let Err(err) = self.pool.unsubscribe(channel).await {
                    tracing::debug!("Cleanup unsubscribe for {} failed: {}", channel, err);
                }
                Err(ClusterError::SubscribeTimeout {
                    channel: channel.to_string(),
                    after,
                })
            }
        }
    }

    /// Single release point: drops the local entry when empty and the shard link when
    /// nothing wants the channel anymore. Caller holds the channel lock.
    async fn drop_unused_locked(&self, channel: &str) -> Result<()> {
        if self
            .local
            .get(channel)
            .is_some_and(|sockets| !sockets.is_empty())
        {
            return Ok(());
        }
        self.local.remove(channel);

        if self.global.contains_key(channel) {
            return Ok(());
        }

        // A pending link is released by its own completion.
        let linked = self
            .links
            .remove_if(channel, |_, link| matches!(link, ShardLink::Linked))
            .is_some();
        if linked {
            tracing::debug!("Dropping shard subscription for {}", channel);
            self.pool.unsubscribe(channel).await?;
        }
        Ok(())
    }

    pub async fn drop_unused_subscriptions(&self, channel: &str) -> Result<()> {
        let _guard = self.lock_channel(channel).await;
        self.drop_unused_locked(channel).await
    }

    // =========================================================================
    // Global subscriptions
    // =========================================================================

    pub async fn global_subscribe(&self, channel: &str) -> Result<()> {
        {
            let _guard = self.lock_channel(channel).await;
            if self.global.get(channel).map(|state| *state) == Some(GlobalSubscription::Active) {
                return Ok(());
            }
            self.global
                .insert(channel.to_string(), GlobalSubscription::Pending);
        }

        let result = self.link(channel).await;

        let _guard = self.lock_channel(channel).await;
        match &result {
            Ok(()) => {
                // Absent means it was unsubscribed meanwhile; the link already let go.
                if let Some(mut state) = self.global.get_mut(channel) {
                    *state = GlobalSubscription::Active;
                }
                tracing::debug!("Global subscription to {} active", channel);
            }
            Err(err) => {
                tracing::debug!("Global subscribe to {} failed: {}", channel, err);
                self.global.remove_if(channel, |_, state| {
                    *state == GlobalSubscription::Pending
                });
                if let Err(drop_err) = self.drop_unused_locked(channel).await {
                    self.events.report(drop_err);
                }
            }
        }
        result
    }

    pub async fn global_unsubscribe(&self, channel: &str) -> Result<()> {
        let _guard = self.lock_channel(channel).await;
        self.global.remove(channel);
        self.drop_unused_locked(channel).await
    }

    /// Clears every global subscription. Releases run concurrently; the first error
    /// is returned after all of them finished.
    pub async fn unsubscribe_all(&self) -> Result<()> {
        let channels: Vec<String> = self.global.iter().map(|entry| entry.key().clone()).collect();
        tracing::info!("Clearing {} global subscription(s)", channels.len());

        join_all(channels.iter().map(|channel| self.global_unsubscribe(channel)))
            .await
            .into_iter()
            .collect()
    }

    pub fn is_subscribed(&self, channel: &str, include_pending: bool) -> bool {
        match self.global.get(channel).map(|state| *state) {
            Some(GlobalSubscription::Active) => true,
            Some(GlobalSubscription::Pending) => include_pending,
            None => false,
        }
    }

    pub fn subscriptions(&self, include_pending: bool) -> Vec<String> {
        let mut channels: Vec<String> = self
            .global
            .iter()
            .filter(|entry| include_pending || *entry.value() == GlobalSubscription::Active)
            .map(|entry| entry.key().clone())
            .collect();
        channels.sort();
        channels
    }

    // =========================================================================
    // Local subscribers
    // =========================================================================

    /// Registers `socket` for `channel` and makes sure the shard link exists.
    /// On failure the socket is unregistered again.
    pub(crate) async fn add_local(&self, channel: &str, id: &SocketId, socket: Arc<dyn Socket>) -> Result<()> {
        {
            let _guard = self.lock_channel(channel).await;
            self.local
                .entry(channel.to_string())
                .or_default()
                .insert(id.clone(), socket);
        }

        if let Err(err) = self.link(channel).await {
            let _guard = self.lock_channel(channel).await;
            if let Some(mut sockets) = self.local.get_mut(channel) {
                sockets.remove(id);
            }
            if let Err(drop_err) = self.drop_unused_locked(channel).await {
                tracing::debug!("Rollback release of {} failed: {}", channel, drop_err);
            }
            return Err(err);
        }
        Ok(())
    }

    pub(crate) async fn remove_local(&self, channel: &str, id: &SocketId) -> Result<()> {
        let _guard = self.lock_channel(channel).await;
        if let Some(mut sockets) = self.local.get_mut(channel) {
            sockets.remove(id);
        }
        self.drop_unused_locked(channel).await
    }

    pub fn local_subscriber_count(&self, channel: &str) -> usize {
        self.local.get(channel).map(|sockets| sockets.len()).unwrap_or(0)
    }

    // =========================================================================
    // Publish and fan-out
    // =========================================================================

    pub async fn publish(&self, channel: &str, publication: Publication) -> Result<()> {
        self.pool.publish(channel, publication).await
    }

    /// Delivers one shard message to local sockets and watchers. Returns how many
    /// sockets received it.
    pub fn deliver(&self, message: &ShardMessage) -> usize {
        let channel = message.channel.as_str();
        let sockets: Vec<(SocketId, Arc<dyn Socket>)> = self
            .local
            .get(channel)
            .map(|sockets| {
                sockets
                    .iter()
                    .map(|(id, socket)| (id.clone(), socket.clone()))
                    .collect()
            })
            .unwrap_or_default();

        let exclude = message.publication.exclude.as_deref();
        let packet = ChannelPacket {
            channel: channel.to_string(),
            data: message.publication.data.clone(),
        };

        let mut delivered = 0;
        for (id, socket) in sockets {
            if exclude == Some(id.as_str()) {
                continue;
            }
            socket.emit_raw(&packet);
            delivered += 1;
        }

        for handler in self.watchers(channel) {
            let data = &message.publication.data;
            if std::panic::catch_unwind(AssertUnwindSafe(|| handler(data))).is_err() {
                self.events.error(ClusterError::Internal(format!(
                    "watcher for channel {} panicked",
                    channel
                )));
            }
        }

        tracing::trace!("Delivered message on {} to {} socket(s)", channel, delivered);
        delivered
    }

    // =========================================================================
    // Watchers
    // =========================================================================

    pub fn watch(&self, channel: &str, handler: WatchHandler) {
        self.watchers
            .entry(channel.to_string())
            .or_default()
            .push(handler);
    }

    /// Removes one handler, every handler of a channel, or every handler at all.
    pub fn unwatch(&self, channel: Option<&str>, handler: Option<&WatchHandler>) {
        match (channel, handler) {
            (None, _) => self.watchers.clear(),
            (Some(channel), None) => {
                self.watchers.remove(channel);
            }
            (Some(channel), Some(handler)) => {
                if let Some(mut handlers) = self.watchers.get_mut(channel) {
                    handlers.retain(|existing| !Arc::ptr_eq(existing, handler));
                }
                self.watchers
                    .remove_if(channel, |_, handlers| handlers.is_empty());
            }
        }
    }

    pub fn watchers(&self, channel: &str) -> Vec<WatchHandler> {
        self.watchers
            .get(channel)
            .map(|handlers| handlers.clone())
            .unwrap_or_default()
    }

    /// Channels whose shard subscription is currently held.
    pub fn linked_channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self
            .links
            .iter()
            .filter(|entry| matches!(entry.value(), ShardLink::Linked))
            .map(|entry| entry.key().clone())
            .collect();
        channels.sort();
        channels
    }
}

impl Drop for SubscriptionRegistry {
    fn drop(&mut self) {
        for relay in self.relays.lock().drain(..) {
            relay.abort();
        }
    }
}
