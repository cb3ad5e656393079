//! Channel handles.
//!
//! State changes happen synchronously on the caller's side; the matching registry
//! calls are queued to one worker per handle and run in request order, so a
//! subscribe followed by an unsubscribe can never be applied the other way round.

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc};

use super::types::{ChannelEvent, ChannelState};
use crate::error::{ClusterError, Result};
use crate::events::{EventBus, FaultBoundary};
use crate::shard::types::Publication;
use crate::subscription::registry::SubscriptionRegistry;
use crate::subscription::types::WatchHandler;

const HANDLE_EVENT_CAPACITY: usize = 64;

pub(crate) type HandleCache = DashMap<String, Arc<ChannelHandle>>;

enum HandleCommand {
    Subscribe { generation: u64 },
    Unsubscribe,
}

struct HandleState {
    state: ChannelState,
    /// Bumped by every subscribe/unsubscribe so stale completions are ignored.
    generation: u64,
}

pub struct ChannelHandle {
    name: String,
    state: Mutex<HandleState>,
    commands: mpsc::UnboundedSender<HandleCommand>,
    events: broadcast::Sender<ChannelEvent>,
    client_events: broadcast::Sender<ChannelEvent>,
    registry: Arc<SubscriptionRegistry>,
    cache: Weak<HandleCache>,
    bus: EventBus,
}

impl ChannelHandle {
    pub(crate) fn new(
        name: &str,
        registry: Arc<SubscriptionRegistry>,
        client_events: broadcast::Sender<ChannelEvent>,
        cache: Weak<HandleCache>,
        faults: &FaultBoundary,
    ) -> Arc<Self> {
        let (commands, queue) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(HANDLE_EVENT_CAPACITY);
        let handle = Arc::new(Self {
            name: name.to_string(),
            state: Mutex::new(HandleState {
                state: ChannelState::Unsubscribed,
                generation: 0,
            }),
            commands,
            events,
            client_events,
            registry: registry.clone(),
            cache,
            bus: faults.events().clone(),
        });

        faults.spawn(
            "channel-commands",
            run_commands(
                Arc::downgrade(&handle),
                name.to_string(),
                registry,
                queue,
                faults.events().clone(),
            ),
        );
        handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ChannelState {
        self.state.lock().state
    }

    pub fn is_subscribed(&self, include_pending: bool) -> bool {
        match self.state() {
            ChannelState::Subscribed => true,
            ChannelState::Pending => include_pending,
            ChannelState::Unsubscribed => false,
        }
    }

    /// Moves to `Pending` right away and subscribes in the background. No-op unless
    /// the handle is `Unsubscribed`.
    pub fn subscribe(&self) {
        let failed = {
            let mut state = self.state.lock();
            if state.state != ChannelState::Unsubscribed {
                return;
            }
            state.state = ChannelState::Pending;
            state.generation += 1;
            let sent = self.commands.send(HandleCommand::Subscribe {
                generation: state.generation,
            });
            if sent.is_err() {
                state.state = ChannelState::Unsubscribed;
            }
            sent.is_err()
        };

        if failed {
            let error = self.worker_gone();
            self.emit(ChannelEvent::SubscribeFail {
                channel: self.name.clone(),
                error,
            });
        }
    }

    /// Moves to `Unsubscribed` right away. `Unsubscribe` is only emitted when the
    /// handle had actually reached `Subscribed`.
    pub fn unsubscribe(&self) {
        let previous = {
            let mut state = self.state.lock();
            let previous = state.state;
            if previous == ChannelState::Unsubscribed {
                return;
            }
            state.state = ChannelState::Unsubscribed;
            state.generation += 1;
            if self.commands.send(HandleCommand::Unsubscribe).is_err() {
                let error = self.worker_gone();
                self.bus.error(error);
            }
            previous
        };

        if previous == ChannelState::Subscribed {
            self.emit(ChannelEvent::Unsubscribe(self.name.clone()));
        }
    }

    fn finish_subscribe(&self, generation: u64, result: Result<()>) {
        let event = {
            let mut state = self.state.lock();
            if state.generation != generation || state.state != ChannelState::Pending {
                tracing::trace!("Ignoring stale subscribe completion for {}", self.name);
                return;
            }
            match result {
                Ok(()) => {
                    state.state = ChannelState::Subscribed;
                    ChannelEvent::Subscribe(self.name.clone())
                }
                Err(error) => {
                    tracing::warn!("Subscribe to {} failed: {}", self.name, error);
                    state.state = ChannelState::Unsubscribed;
                    ChannelEvent::SubscribeFail {
                        channel: self.name.clone(),
                        error,
                    }
                }
            }
        };
        self.emit(event);
    }

    fn worker_gone(&self) -> ClusterError {
        ClusterError::Internal(format!("command worker for channel {} has stopped", self.name))
    }

    fn emit(&self, event: ChannelEvent) {
        let _ = self.events.send(event.clone());
        let _ = self.client_events.send(event);
    }

    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.events.subscribe()
    }

    pub async fn publish(&self, data: Value) -> Result<()> {
        self.registry
            .publish(&self.name, Publication::new(data))
            .await
    }

    pub fn watch(&self, handler: WatchHandler) {
        self.registry.watch(&self.name, handler);
    }

    /// `None` removes every watcher of this channel.
    pub fn unwatch(&self, handler: Option<&WatchHandler>) {
        self.registry.unwatch(Some(&self.name), handler);
    }

    pub fn watchers(&self) -> Vec<WatchHandler> {
        self.registry.watchers(&self.name)
    }

    /// Drops watchers, unsubscribes and evicts the handle from its client's cache.
    pub fn destroy(&self) {
        self.unwatch(None);
        self.unsubscribe();
        if let Some(cache) = self.cache.upgrade() {
            cache.remove(&self.name);
        }
    }
}

async fn run_commands(
    handle: Weak<ChannelHandle>,
    channel: String,
    registry: Arc<SubscriptionRegistry>,
    mut queue: mpsc::UnboundedReceiver<HandleCommand>,
    events: EventBus,
) -> Result<()> {
    while let Some(command) = queue.recv().await {
        match command {
            HandleCommand::Subscribe { generation } => {
                let result = registry.global_subscribe(&channel).await;
                match handle.upgrade() {
                    Some(handle) => handle.finish_subscribe(generation, result),
                    None => {
                        // Handle is gone; nobody is left to want the channel.
                        if result.is_ok()
                            && let Err(err) = registry.global_unsubscribe(&channel).await
                        {
                            events.report(err);
                        }
                    }
                }
            }
            HandleCommand::Unsubscribe => {
                if let Err(err) = registry.global_unsubscribe(&channel).await {
                    events.report(err);
                }
            }
        }
    }
    Ok(())
}
