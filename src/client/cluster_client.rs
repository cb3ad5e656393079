//! The coordination-layer client a server instance runs.

use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;

use super::global::GlobalClient;
use crate::config::ClusterOptions;
use crate::error::{ClusterError, Result};
use crate::events::{ClusterEvent, EventBus, FaultBoundary};
use crate::routing::mapper;
use crate::shard::connection::ShardConnection;
use crate::shard::pool::ClientCluster;
use crate::shard::types::Publication;
use crate::subscription::registry::SubscriptionRegistry;
use crate::subscription::socket::{SocketBinder, SocketBinding};
use crate::subscription::types::{Socket, SocketId, WatchHandler};

pub struct IoClusterClient {
    private: Arc<ClientCluster>,
    registry: Arc<SubscriptionRegistry>,
    binder: Arc<SocketBinder>,
    global: GlobalClient,
    faults: FaultBoundary,
}

impl IoClusterClient {
    /// Builds the client over `shards` (in shard id order) and starts waiting for them.
    /// `Ready` fires once every shard is reachable; missing `connect_timeout` emits a
    /// `ConnectTimeout` error instead.
    pub fn new(options: &ClusterOptions, shards: Vec<Arc<dyn ShardConnection>>) -> Arc<Self> {
        let events = EventBus::new();
        let faults = FaultBoundary::new(events.clone());

        let private = Arc::new(ClientCluster::new(shards.clone(), mapper::private()));
        let public = Arc::new(ClientCluster::new(shards.clone(), mapper::public()));

        let registry = SubscriptionRegistry::new(
            private.clone(),
            options.subscribe_timeout(),
            events.clone(),
        );
        registry.start_relay();

        let binder = SocketBinder::new(registry.clone(), options.channel_limit(), events.clone());
        let global = GlobalClient::new(registry.clone(), public, faults.clone());

        let connect_timeout = options.connect_timeout();
        let ready_events = events.clone();
        faults.spawn("shard-readiness", async move {
            let all_ready = join_all(shards.iter().map(|shard| shard.ready()));
            match tokio::time::timeout(connect_timeout, all_ready).await {
                Ok(results) => {
                    results.into_iter().collect::<Result<Vec<()>>>()?;
                    tracing::info!("All {} shard connection(s) ready", shards.len());
                    ready_events.mark_ready();
                    Ok(())
                }
                Err(_) => Err(ClusterError::ConnectTimeout {
                    after: connect_timeout,
                }),
            }
        });

        Arc::new(Self {
            private,
            registry,
            binder,
            global,
            faults,
        })
    }

    pub fn events(&self) -> tokio::sync::broadcast::Receiver<ClusterEvent> {
        self.faults.events().subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.faults.events().is_ready()
    }

    pub async fn ready(&self) {
        self.faults.events().wait_ready().await
    }

    pub fn on_ready<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.faults.events().on_ready(listener);
    }

    pub fn global(&self) -> &GlobalClient {
        &self.global
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    // =========================================================================
    // Sockets
    // =========================================================================

    /// Attaches a socket. A handshake failure goes back to the caller only; the
    /// transport should drop the socket when `should_drop_socket` says so.
    pub fn bind(&self, socket: Arc<dyn Socket>) -> Result<SocketBinding> {
        self.binder.bind(socket)
    }

    pub async fn unbind(&self, id: &SocketId) -> Result<()> {
        self.binder.unbind(id).await
    }

    pub fn binding(&self, id: &SocketId) -> Option<SocketBinding> {
        self.binder.binding(id)
    }

    // =========================================================================
    // Channels
    // =========================================================================

    pub async fn publish(&self, channel: &str, data: Value) -> Result<()> {
        self.registry
            .publish(channel, Publication::new(data))
            .await
    }

    pub async fn publish_excluding(&self, channel: &str, data: Value, exclude: &SocketId) -> Result<()> {
        self.global.publish_excluding(channel, data, exclude).await
    }

    pub async fn subscribe(&self, channel: &str) -> Result<()> {
        self.registry.global_subscribe(channel).await
    }

    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.registry.global_unsubscribe(channel).await
    }

    pub async fn unsubscribe_all(&self) -> Result<()> {
        self.registry.unsubscribe_all().await
    }

    pub fn is_subscribed(&self, channel: &str, include_pending: bool) -> bool {
        self.registry.is_subscribed(channel, include_pending)
    }

    pub fn subscriptions(&self, include_pending: bool) -> Vec<String> {
        self.registry.subscriptions(include_pending)
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

    /// Drops every shard subscription held by this instance.
    pub async fn destroy(&self) -> Result<()> {
        tracing::info!("Destroying cluster client");
        self.private.remove_all().await
    }
}
