use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use super::launcher::{ShardLauncher, ShardProcess};
use super::types::ShardSpec;
use crate::config::ClusterOptions;
use crate::error::ClusterError;
use crate::events::{ClusterEvent, EventBus};
use crate::routing::types::ShardId;

const LAUNCH_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Keeps one store process alive per configured shard.
pub struct ShardSupervisor {
    specs: Vec<ShardSpec>,
    launcher: Arc<dyn ShardLauncher>,
    events: EventBus,
    ready_count: AtomicUsize,
    launches: DashMap<ShardId, usize>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

enum Outcome<T> {
    Done(T),
    Shutdown,
}

impl ShardSupervisor {
    /// Launches every shard in `options.stores` and returns immediately.
    pub fn start(options: &ClusterOptions, launcher: Arc<dyn ShardLauncher>) -> Arc<Self> {
        let specs = ShardSpec::all_from_options(options);
        let (shutdown, _) = watch::channel(false);

        let supervisor = Arc::new(Self {
            specs,
            launcher,
            events: EventBus::new(),
            ready_count: AtomicUsize::new(0),
            launches: DashMap::new(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        });

        tracing::info!("Starting {} shard(s)", supervisor.specs.len());

        let handles: Vec<JoinHandle<()>> = supervisor
            .specs
            .iter()
            .cloned()
            .map(|spec| {
                let service = supervisor.clone();
                let shutdown = supervisor.shutdown.subscribe();
                tokio::spawn(async move {
                    service.supervise(spec, shutdown).await;
                })
            })
            .collect();
        supervisor.tasks.lock().extend(handles);

        if supervisor.specs.is_empty() {
            supervisor.events.mark_ready();
        }

        supervisor
    }

    pub fn events(&self) -> broadcast::Receiver<ClusterEvent> {
        self.events.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.events.is_ready()
    }

    pub async fn ready(&self) {
        self.events.wait_ready().await
    }

    pub fn on_ready<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.events.on_ready(listener)
    }

    pub fn shard_count(&self) -> usize {
        self.specs.len()
    }

    /// How many times the shard's process has been started.
    pub fn launch_count(&self, id: ShardId) -> usize {
        self.launches.get(&id).map(|count| *count).unwrap_or(0)
    }

    /// Stops supervision and terminates every shard process.
    pub async fn destroy(&self) {
        tracing::info!("Destroying {} shard(s)", self.specs.len());
        self.shutdown.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Shard supervision task failed: {}", e);
            }
        }
    }

    async fn supervise(self: Arc<Self>, spec: ShardSpec, mut shutdown: watch::Receiver<bool>) {
        let mut counted_ready = false;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let mut process = match self.launcher.launch(&spec).await {
                Ok(process) => process,
                Err(e) => {
                    self.events.error(ClusterError::Launch {
                        address: spec.address.clone(),
                        message: e.to_string(),
                    });
                    let jitter = rand::random::<u64>() % 50;
                    let delay = LAUNCH_RETRY_DELAY + Duration::from_millis(jitter);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = shutdown.changed() => break,
                    }
                }
            };

            *self.launches.entry(spec.id).or_insert(0) += 1;
            tracing::info!("Launched shard {} at {}", spec.id, spec.address);

            let readiness = tokio::select! {
                ready = process.ready() => Outcome::Done(ready),
                _ = shutdown.changed() => Outcome::Shutdown,
            };
            match readiness {
                Outcome::Shutdown => {
                    self.stop(&spec, process).await;
                    break;
                }
                Outcome::Done(Ok(())) => {
                    if !counted_ready {
                        counted_ready = true;
                        self.shard_ready(&spec);
                    }
                }
                Outcome::Done(Err(e)) => {
                    tracing::warn!("Shard {} failed to become ready: {}", spec.id, e);
                }
            }

            let exit = tokio::select! {
                status = process.exited() => Outcome::Done(status),
                _ = shutdown.changed() => Outcome::Shutdown,
            };
            let status = match exit {
                Outcome::Shutdown => {
                    self.stop(&spec, process).await;
                    break;
                }
                Outcome::Done(Ok(status)) => status,
                Outcome::Done(Err(e)) => e.to_string(),
            };

            if *shutdown.borrow() {
                break;
            }

            tracing::warn!(
                "Shard {} at {} exited ({}), relaunching",
                spec.id,
                spec.address,
                status
            );
            self.events.error(ClusterError::ShardExited {
                id: spec.id,
                address: spec.address.clone(),
                status,
            });
        }

        tracing::debug!("Stopped supervising shard {}", spec.id);
    }

    fn shard_ready(&self, spec: &ShardSpec) {
        let ready = self.ready_count.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(
            "Shard {} ready ({}/{})",
            spec.id,
            ready,
            self.specs.len()
        );
        if ready >= self.specs.len() && self.events.mark_ready() {
            tracing::info!("All {} shard(s) ready", self.specs.len());
        }
    }

    async fn stop(&self, spec: &ShardSpec, mut process: Box<dyn ShardProcess>) {
        let timeout = Duration::from_millis(spec.process_term_timeout_ms);
        if let Err(e) = process.terminate(timeout).await {
            tracing::error!("Failed to terminate shard {}: {}", spec.id, e);
        }
    }
}
