//! Supervisor Module Tests
//!
//! ## Test Scopes
//! - **Specs**: options are carried into every shard launch verbatim.
//! - **Ready quorum**: `Ready` fires once, after all shards, and never again on relaunch.
//! - **Recovery**: exits are reported and relaunched in place; launch failures are retried.
//! - **Teardown**: `destroy` terminates processes and stops relaunching.

#[cfg(test)]
mod tests {
    use crate::config::ClusterOptions;
    use crate::error::ClusterError;
    use crate::events::ClusterEvent;
    use crate::routing::types::ShardId;
    use crate::supervisor::launcher::{ShardLauncher, ShardProcess};
    use crate::supervisor::service::ShardSupervisor;
    use crate::supervisor::types::ShardSpec;
    use async_trait::async_trait;
    use dashmap::DashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{broadcast, oneshot};

    /// Launcher whose processes become ready at once and exit when told to.
    #[derive(Default)]
    struct ScriptedLauncher {
        launched: parking_lot::Mutex<Vec<ShardSpec>>,
        exits: DashMap<ShardId, oneshot::Sender<String>>,
        failing_launches: AtomicUsize,
        terminated: Arc<AtomicUsize>,
    }

    impl ScriptedLauncher {
        fn crash(&self, id: ShardId, status: &str) {
            let (_, tx) = self.exits.remove(&id).expect("shard not running");
            tx.send(status.to_string()).unwrap();
        }

        fn launched_for(&self, id: ShardId) -> Vec<ShardSpec> {
            self.launched
                .lock()
                .iter()
                .filter(|spec| spec.id == id)
                .cloned()
                .collect()
        }
    }

    struct ScriptedProcess {
        exit: Option<oneshot::Receiver<String>>,
        terminated: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ShardLauncher for ScriptedLauncher {
        async fn launch(&self, spec: &ShardSpec) -> anyhow::Result<Box<dyn ShardProcess>> {
            if self.failing_launches.load(Ordering::SeqCst) > 0 {
                self.failing_launches.fetch_sub(1, Ordering::SeqCst);
                anyhow::bail!("no such file");
            }
            let (tx, rx) = oneshot::channel();
            self.exits.insert(spec.id, tx);
            self.launched.lock().push(spec.clone());
            Ok(Box::new(ScriptedProcess {
                exit: Some(rx),
                terminated: self.terminated.clone(),
            }))
        }
    }

    #[async_trait]
    impl ShardProcess for ScriptedProcess {
        async fn ready(&mut self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn exited(&mut self) -> anyhow::Result<String> {
            match self.exit.take() {
                Some(rx) => match rx.await {
                    Ok(status) => Ok(status),
                    Err(_) => std::future::pending().await,
                },
                None => std::future::pending().await,
            }
        }

        async fn terminate(&mut self, _timeout: Duration) -> anyhow::Result<()> {
            self.terminated.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn options(count: usize) -> ClusterOptions {
        ClusterOptions {
            stores: (0..count).map(|i| format!("/tmp/store{}.sock", i)).collect(),
            secret_key: Some("s3cret".to_string()),
            expiry_accuracy_ms: Some(1000),
            store_options: serde_json::json!({"maxKeys": 10}),
            ..ClusterOptions::default()
        }
    }

    async fn next_event(rx: &mut broadcast::Receiver<ClusterEvent>) -> ClusterEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event stream closed")
    }

    async fn wait_until(check: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    // ============================================================
    // SPEC TESTS
    // ============================================================

    #[test]
    fn test_specs_follow_store_order() {
        let specs = ShardSpec::all_from_options(&options(3));

        assert_eq!(specs.len(), 3);
        assert_eq!(specs[2].id, ShardId(2));
        assert_eq!(specs[2].address, "/tmp/store2.sock");
        assert_eq!(specs[0].secret_key.as_deref(), Some("s3cret"));
        assert_eq!(specs[1].store_options["maxKeys"], 10);
    }

    #[test]
    fn test_spec_serialization_hides_secret() {
        let spec = ShardSpec::from_options(ShardId(0), "/tmp/a.sock", &options(1));
        let json = serde_json::to_string(&spec).unwrap();
        assert!(!json.contains("s3cret"));
    }

    // ============================================================
    // READY / RECOVERY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_ready_after_all_shards() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let supervisor = ShardSupervisor::start(&options(3), launcher.clone());

        tokio::time::timeout(Duration::from_secs(2), supervisor.ready())
            .await
            .expect("supervisor never became ready");

        assert!(supervisor.is_ready());
        for id in 0..3 {
            assert_eq!(supervisor.launch_count(ShardId(id)), 1);
        }
        supervisor.destroy().await;
    }

    #[tokio::test]
    async fn test_crash_relaunches_same_shard_once_without_new_ready() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let supervisor = ShardSupervisor::start(&options(2), launcher.clone());
        let mut events = supervisor.events();

        assert_eq!(next_event(&mut events).await, ClusterEvent::Ready);

        launcher.crash(ShardId(1), "signal: 9");

        match next_event(&mut events).await {
            ClusterEvent::Error(ClusterError::ShardExited {
                id,
                address,
                status,
            }) => {
                assert_eq!(id, ShardId(1));
                assert_eq!(address, "/tmp/store1.sock");
                assert_eq!(status, "signal: 9");
            }
            other => panic!("unexpected event {:?}", other),
        }

        wait_until(|| supervisor.launch_count(ShardId(1)) == 2).await;
        assert_eq!(supervisor.launch_count(ShardId(0)), 1);

        let relaunched = launcher.launched_for(ShardId(1));
        assert_eq!(relaunched.len(), 2);
        assert_eq!(relaunched[0], relaunched[1]);

        // The relaunch reached ready but no second Ready event is emitted.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(
            events.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        supervisor.destroy().await;
    }

    #[tokio::test]
    async fn test_launch_failure_is_reported_and_retried() {
        let launcher = Arc::new(ScriptedLauncher::default());
        launcher.failing_launches.store(1, Ordering::SeqCst);
        let supervisor = ShardSupervisor::start(&options(1), launcher.clone());
        let mut events = supervisor.events();

        match next_event(&mut events).await {
            ClusterEvent::Error(ClusterError::Launch { address, message }) => {
                assert_eq!(address, "/tmp/store0.sock");
                assert!(message.contains("no such file"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(next_event(&mut events).await, ClusterEvent::Ready);
        assert_eq!(supervisor.launch_count(ShardId(0)), 1);

        supervisor.destroy().await;
    }

    #[tokio::test]
    async fn test_on_ready_replays_after_start() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let supervisor = ShardSupervisor::start(&options(1), launcher);
        supervisor.ready().await;

        let (tx, rx) = oneshot::channel();
        supervisor.on_ready(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
        supervisor.destroy().await;
    }

    // ============================================================
    // TEARDOWN TESTS
    // ============================================================

    #[tokio::test]
    async fn test_destroy_terminates_and_stops_relaunching() {
        let launcher = Arc::new(ScriptedLauncher::default());
        let supervisor = ShardSupervisor::start(&options(2), launcher.clone());
        supervisor.ready().await;

        supervisor.destroy().await;

        assert_eq!(launcher.terminated.load(Ordering::SeqCst), 2);
        assert_eq!(supervisor.launch_count(ShardId(0)), 1);
        assert_eq!(supervisor.launch_count(ShardId(1)), 1);
    }
}
