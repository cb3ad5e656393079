//! Instance-level event plumbing.
//!
//! Each client or supervisor owns one [`EventBus`]: a `broadcast` stream of
//! [`ClusterEvent`]s plus a `watch` latch so readiness can be observed after the fact.
//! Background work is spawned through a [`FaultBoundary`] so a failing or panicking
//! task becomes an `Error` event instead of disappearing.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::{ClusterError, Result};

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    /// All shards became ready. Fired at most once per instance.
    Ready,
    /// Non-fatal incident that operators should see.
    Error(ClusterError),
    /// Informative failure caused by normal churn.
    Notice(ClusterError),
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClusterEvent>,
    ready: Arc<watch::Sender<bool>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (ready, _) = watch::channel(false);
        Self {
            tx,
            ready: Arc::new(ready),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClusterEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: ClusterEvent) {
        // No listeners is fine.
        let _ = self.tx.send(event);
    }

    pub fn error(&self, err: ClusterError) {
        tracing::error!("{}", err);
        self.emit(ClusterEvent::Error(err));
    }

    pub fn notice(&self, err: ClusterError) {
        tracing::debug!("notice: {}", err);
        self.emit(ClusterEvent::Notice(err));
    }

    /// Routes `err` to `Notice` or `Error` by its classification.
    pub fn report(&self, err: ClusterError) {
        if err.is_notice() {
            self.notice(err);
        } else {
            self.error(err);
        }
    }

    /// Latches readiness. Returns `true` (and emits `Ready`) only the first time.
    pub fn mark_ready(&self) -> bool {
        let changed = self.ready.send_if_modified(|ready| {
            if *ready {
                false
            } else {
                *ready = true;
                true
            }
        });
        if changed {
            self.emit(ClusterEvent::Ready);
        }
        changed
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub async fn wait_ready(&self) {
        let mut rx = self.ready.subscribe();
        // The sender lives in `self`, so the channel cannot close under us.
        let _ = rx.wait_for(|ready| *ready).await;
    }

    /// Runs `listener` now if already ready, otherwise once readiness is reached.
    pub fn on_ready<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_ready() {
            listener();
            return;
        }
        let bus = self.clone();
        tokio::spawn(async move {
            bus.wait_ready().await;
            listener();
        });
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawns background tasks whose failures surface on an [`EventBus`].
#[derive(Clone)]
pub struct FaultBoundary {
    events: EventBus,
}

impl FaultBoundary {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn spawn<F>(&self, name: &'static str, task: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let events = self.events.clone();
        let inner = tokio::spawn(task);
        tokio::spawn(async move {
            match inner.await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::debug!("Background task '{}' failed: {}", name, err);
                    events.report(err);
                }
                Err(join_err) if join_err.is_panic() => {
                    events.error(ClusterError::Internal(format!(
                        "background task '{}' panicked",
                        name
                    )));
                }
                Err(_) => {
                    tracing::trace!("Background task '{}' cancelled", name);
                }
            }
        })
    }
}
