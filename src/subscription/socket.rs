//! Socket binding: per-socket channel bookkeeping on top of the registry.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;

use super::registry::SubscriptionRegistry;
use super::types::{KickOutNotice, Responder, Socket, SocketId, SocketSubscriptionState};
use crate::error::{ClusterError, Result};
use crate::events::EventBus;

struct BoundSocket {
    id: SocketId,
    socket: Arc<dyn Socket>,
    /// Held for the whole of a request, so requests from one socket run in order.
    state: Mutex<SocketSubscriptionState>,
    bound: AtomicBool,
}

pub struct SocketBinder {
    registry: Arc<SubscriptionRegistry>,
    sockets: DashMap<SocketId, Arc<BoundSocket>>,
    channel_limit: Option<usize>,
    events: EventBus,
}

/// Handle a transport keeps for one bound socket. Forwards the socket's
/// subscribe/unsubscribe requests and exposes the kick-out capability.
#[derive(Clone)]
pub struct SocketBinding {
    binder: Arc<SocketBinder>,
    entry: Arc<BoundSocket>,
}

impl SocketBinder {
    pub fn new(registry: Arc<SubscriptionRegistry>, channel_limit: Option<usize>, events: EventBus) -> Arc<Self> {
        Arc::new(Self {
            registry,
            sockets: DashMap::new(),
            channel_limit,
            events,
        })
    }

    pub fn bind(self: &Arc<Self>, socket: Arc<dyn Socket>) -> Result<SocketBinding> {
        let id = match socket.id() {
            Some(id) if !id.as_str().is_empty() => id,
            _ => return Err(ClusterError::Handshake),
        };

        let entry = match self.sockets.entry(id.clone()) {
            Entry::Occupied(_) => {
                return Err(ClusterError::SocketAlreadyBound {
                    socket: id.to_string(),
                });
            }
            Entry::Vacant(vacant) => {
                tracing::debug!("Bound socket {}", id);
                vacant
                    .insert(Arc::new(BoundSocket {
                        id: id.clone(),
                        socket,
                        state: Mutex::new(SocketSubscriptionState::default()),
                        bound: AtomicBool::new(true),
                    }))
                    .clone()
            }
        };

        Ok(SocketBinding {
            binder: self.clone(),
            entry,
        })
    }

    /// Unsubscribes the socket from everything it holds and forgets it.
    pub async fn unbind(&self, id: &SocketId) -> Result<()> {
        let Some((_, entry)) = self.sockets.remove(id) else {
            return Ok(());
        };
        entry.bound.store(false, Ordering::SeqCst);

        let mut state = entry.state.lock().await;
        let channels = state.channels();
        let result = self.unsubscribe_locked(&entry, &mut state, &channels).await;
        tracing::debug!("Unbound socket {} ({} channel(s) released)", id, channels.len());
        result
    }

    pub fn binding(self: &Arc<Self>, id: &SocketId) -> Option<SocketBinding> {
        self.sockets.get(id).map(|entry| SocketBinding {
            binder: self.clone(),
            entry: entry.value().clone(),
        })
    }

    pub fn bound_sockets(&self) -> usize {
        self.sockets.len()
    }

    async fn subscribe_entry(&self, entry: &BoundSocket, channels: &[String]) -> Result<()> {
        if !entry.bound.load(Ordering::SeqCst) {
            return Err(ClusterError::SocketUnbound {
                socket: entry.id.to_string(),
            });
        }

        let mut state = entry.state.lock().await;
        // Sequential; the first failure stops the rest of the list.
        for channel in channels {
            self.subscribe_one(entry, &mut state, channel).await?;
        }
        Ok(())
    }

    async fn subscribe_one(
        &self,
        entry: &BoundSocket,
        state: &mut SocketSubscriptionState,
        channel: &str,
    ) -> Result<()> {
        if state.contains(channel) {
            return Ok(());
        }
        if let Some(limit) = self.channel_limit
            && state.count() >= limit
        {
            return Err(ClusterError::ChannelLimit {
                socket: entry.id.to_string(),
                limit,
            });
        }

        state.insert(channel);
        match self
            .registry
            .add_local(channel, &entry.id, entry.socket.clone())
            .await
        {
            Ok(()) => {
                tracing::debug!("Socket {} subscribed to {}", entry.id, channel);
                Ok(())
            }
            Err(err) => {
                state.remove(channel);
                Err(err)
            }
        }
    }

    async fn unsubscribe_entry(&self, entry: &BoundSocket, channels: Option<&[String]>) -> Result<()> {
        if !entry.bound.load(Ordering::SeqCst) {
            return Err(ClusterError::SocketUnbound {
                socket: entry.id.to_string(),
            });
        }

        let mut state = entry.state.lock().await;
        let channels = match channels {
            Some(channels) => channels.to_vec(),
            None => state.channels(),
        };
        self.unsubscribe_locked(entry, &mut state, &channels).await
    }

    /// Releases every listed channel even if one release fails; returns the first error.
    async fn unsubscribe_locked(
        &self,
        entry: &BoundSocket,
        state: &mut SocketSubscriptionState,
        channels: &[String],
    ) -> Result<()> {
        let mut first_error = None;
        for channel in channels {
            state.remove(channel);
            if let Err(err) = self.registry.remove_local(channel, &entry.id).await {
                tracing::debug!("Socket {} unsubscribe from {} failed: {}", entry.id, channel, err);
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn kick_out_entry(&self, entry: &BoundSocket, channel: Option<&str>, message: &str) -> Result<()> {
        let mut state = entry.state.lock().await;
        let channels = match channel {
            Some(channel) => vec![channel.to_string()],
            None => state.channels(),
        };

        for channel in &channels {
            entry.socket.kick_out(&KickOutNotice {
                message: message.to_string(),
                channel: channel.clone(),
            });
        }
        tracing::info!("Kicked socket {} out of {} channel(s)", entry.id, channels.len());

        self.unsubscribe_locked(entry, &mut state, &channels).await
    }
}

impl SocketBinding {
    pub fn id(&self) -> &SocketId {
        &self.entry.id
    }

    pub fn is_bound(&self) -> bool {
        self.entry.bound.load(Ordering::SeqCst)
    }

    pub async fn subscribe(&self, channel: &str) -> Result<()> {
        self.binder
            .subscribe_entry(&self.entry, &[channel.to_string()])
            .await
    }

    pub async fn subscribe_many(&self, channels: &[String]) -> Result<()> {
        self.binder.subscribe_entry(&self.entry, channels).await
    }

    /// `None` unsubscribes from every channel the socket holds.
    pub async fn unsubscribe(&self, channel: Option<&str>) -> Result<()> {
        match channel {
            Some(channel) => {
                self.binder
                    .unsubscribe_entry(&self.entry, Some(&[channel.to_string()]))
                    .await
            }
            None => self.binder.unsubscribe_entry(&self.entry, None).await,
        }
    }

    pub async fn unsubscribe_many(&self, channels: &[String]) -> Result<()> {
        self.binder.unsubscribe_entry(&self.entry, Some(channels)).await
    }

    /// Transport entry point for a subscribe request. Failures are answered to the
    /// socket and emitted as notices.
    pub async fn on_subscribe<R: Responder>(&self, channel: &str, responder: R) {
        match self.subscribe(channel).await {
            Ok(()) => responder.end(),
            Err(err) => {
                responder.error(&err);
                self.binder.events.notice(err);
            }
        }
    }

    pub async fn on_unsubscribe<R: Responder>(&self, channel: Option<&str>, responder: R) {
        match self.unsubscribe(channel).await {
            Ok(()) => responder.end(),
            Err(err) => {
                responder.error(&err);
                self.binder.events.report(err);
            }
        }
    }

    /// Notifies the socket and removes it from `channel`, or from all its channels.
    pub async fn kick_out(&self, channel: Option<&str>, message: &str) -> Result<()> {
        self.binder
            .kick_out_entry(&self.entry, channel, message)
            .await
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.entry.state.lock().await.channels()
    }

    pub async fn subscription_count(&self) -> usize {
        self.entry.state.lock().await.count()
    }
}
