//! Client Module Tests
//!
//! ## Test Scopes
//! - **Channel handles**: synchronous state changes, event emission rules, failure handling.
//! - **Global data**: namespaced keys on the public shard, expiry and queries.
//! - **Cluster client**: readiness, connect timeout, socket fan-out and teardown.

#[cfg(test)]
mod tests {
    use crate::client::cluster_client::IoClusterClient;
    use crate::client::global::DataClient;
    use crate::client::types::{ChannelEvent, ChannelState};
    use crate::config::ClusterOptions;
    use crate::error::ClusterError;
    use crate::events::ClusterEvent;
    use crate::routing::types::{Operation, Route, RoutingKey, ShardId};
    use crate::shard::connection::ShardConnection;
    use crate::shard::memory::MemoryShard;
    use crate::shard::types::{Query, QueryKind};
    use crate::subscription::types::{ChannelPacket, KickOutNotice, Socket, SocketId};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::broadcast;

    fn options(shard_count: usize) -> ClusterOptions {
        ClusterOptions {
            stores: (0..shard_count).map(|i| format!("/tmp/client{}.sock", i)).collect(),
            connect_timeout_ms: 200,
            ..Default::default()
        }
    }

    fn client(shard_count: usize) -> (Vec<Arc<MemoryShard>>, Arc<IoClusterClient>) {
        client_with(options(shard_count))
    }

    fn client_with(options: ClusterOptions) -> (Vec<Arc<MemoryShard>>, Arc<IoClusterClient>) {
        let shards = MemoryShard::for_addresses(&options.stores);
        let connections: Vec<Arc<dyn ShardConnection>> = shards
            .iter()
            .map(|shard| shard.clone() as Arc<dyn ShardConnection>)
            .collect();
        (shards, IoClusterClient::new(&options, connections))
    }

    async fn next<T: Clone>(rx: &mut broadcast::Receiver<T>) -> T {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no event in time")
            .expect("event stream closed")
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    struct CollectingSocket {
        id: SocketId,
        packets: Mutex<Vec<ChannelPacket>>,
    }

    impl Socket for CollectingSocket {
        fn id(&self) -> Option<SocketId> {
            Some(self.id.clone())
        }

        fn emit_raw(&self, packet: &ChannelPacket) {
            self.packets.lock().push(packet.clone());
        }

        fn kick_out(&self, _notice: &KickOutNotice) {}
    }

    fn socket(id: &str) -> Arc<CollectingSocket> {
        Arc::new(CollectingSocket {
            id: SocketId(id.to_string()),
            packets: Mutex::new(Vec::new()),
        })
    }

    // ============================================================
    // CHANNEL HANDLES
    // ============================================================

    #[tokio::test]
    async fn test_subscribe_is_pending_immediately() {
        let (shards, client) = client(2);
        let handle = client.global().channel("news");
        let mut events = handle.events();

        handle.subscribe();
        assert_eq!(handle.state(), ChannelState::Pending);
        assert!(handle.is_subscribed(true));
        assert!(!handle.is_subscribed(false));

        assert_eq!(next(&mut events).await, ChannelEvent::Subscribe("news".to_string()));
        assert_eq!(handle.state(), ChannelState::Subscribed);
        assert_eq!(shards[1].subscribed_channels(), vec!["news"]);
        assert!(client.is_subscribed("news", false));
    }

    #[tokio::test]
    async fn test_repeated_subscribe_emits_once() {
        let (shards, client) = client(2);
        let handle = client.global().channel("news");
        let mut events = handle.events();

        handle.subscribe();
        handle.subscribe();
        assert_eq!(next(&mut events).await, ChannelEvent::Subscribe("news".to_string()));
        handle.subscribe();

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(shards[1].stats().subscribes, 1);
    }

    #[tokio::test]
    async fn test_unsubscribe_while_pending_is_silent() {
        let (shards, client) = client(2);
        shards[1].set_latency(Duration::from_millis(40));
        let handle = client.global().channel("news");
        let mut events = handle.events();

        handle.subscribe();
        handle.unsubscribe();
        assert_eq!(handle.state(), ChannelState::Unsubscribed);

        eventually(|| shards[1].stats().unsubscribes == 1).await;
        eventually(|| shards[1].subscribed_channels().is_empty()).await;
        assert!(events.try_recv().is_err());
        assert_eq!(handle.state(), ChannelState::Unsubscribed);
        assert!(!client.is_subscribed("news", true));
    }

    #[tokio::test]
    async fn test_unsubscribe_after_subscribed_emits_event() {
        let (shards, client) = client(2);
        let handle = client.global().channel("news");
        let mut events = handle.events();
        handle.subscribe();
        assert_eq!(next(&mut events).await, ChannelEvent::Subscribe("news".to_string()));

        handle.unsubscribe();

        assert_eq!(handle.state(), ChannelState::Unsubscribed);
        assert_eq!(next(&mut events).await, ChannelEvent::Unsubscribe("news".to_string()));
        eventually(|| shards[1].subscribed_channels().is_empty()).await;
    }

    #[tokio::test]
    async fn test_subscribe_fail_returns_to_unsubscribed() {
        let (shards, client) = client(2);
        shards[1].fail_subscribes("news", 1);
        let mut client_events = client.global().events();
        let handle = client.global().channel("news");

        handle.subscribe();

        match next(&mut client_events).await {
            ChannelEvent::SubscribeFail { channel, error } => {
                assert_eq!(channel, "news");
                assert!(matches!(error, ClusterError::Shard { .. }));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(handle.state(), ChannelState::Unsubscribed);

        // Retrying works once the shard accepts
        handle.subscribe();
        assert_eq!(
            next(&mut client_events).await,
            ChannelEvent::Subscribe("news".to_string())
        );
    }

    #[test]
    fn test_subscribe_without_worker_rolls_back() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (_client, handle) = runtime.block_on(async {
            let (_shards, client) = client(2);
            let handle = client.global().channel("news");
            (client, handle)
        });
        let mut events = handle.events();
        // Shutting the runtime down drops the handle's command worker
        drop(runtime);

        handle.subscribe();

        assert_eq!(handle.state(), ChannelState::Unsubscribed);
        match events.try_recv().unwrap() {
            ChannelEvent::SubscribeFail { channel, error } => {
                assert_eq!(channel, "news");
                assert!(matches!(error, ClusterError::Internal(_)));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_destroy_channel_evicts_handle() {
        let (shards, client) = client(2);
        let global = client.global();
        let handle = global.subscribe("news");
        eventually(|| handle.is_subscribed(false)).await;
        handle.watch(Arc::new(|_data: &serde_json::Value| {}));

        global.destroy_channel("news");

        assert!(handle.watchers().is_empty());
        assert!(global.subscriptions(true).is_empty());
        eventually(|| shards[1].subscribed_channels().is_empty()).await;
        assert!(!Arc::ptr_eq(&handle, &global.channel("news")));
    }

    #[tokio::test]
    async fn test_global_subscriptions_listing() {
        let (shards, client) = client(2);
        shards[0].set_latency(Duration::from_millis(50));
        let global = client.global();

        // "weather" goes to shard 0, "news" to shard 1
        let news = global.subscribe("news");
        global.subscribe("weather");
        eventually(|| news.is_subscribed(false)).await;

        assert_eq!(global.subscriptions(false), vec!["news"]);
        assert_eq!(global.subscriptions(true), vec!["news", "weather"]);
    }

    // ============================================================
    // GLOBAL DATA
    // ============================================================

    #[tokio::test]
    async fn test_data_lands_under_global_namespace_on_shard_zero() {
        let (shards, client) = client(3);
        let global = client.global();

        global.set("users.42.name", json!("ada")).await.unwrap();

        let stored = shards[0]
            .get(&["__global", "data", "users", "42", "name"].map(String::from))
            .await
            .unwrap();
        assert_eq!(stored, Some(json!("ada")));
        assert_eq!(global.get("users.42.name").await.unwrap(), Some(json!("ada")));
        assert!(global.has_key("users.42").await.unwrap());
        assert_eq!(
            global.get_all().await.unwrap(),
            json!({"users": {"42": {"name": "ada"}}})
        );
    }

    #[tokio::test]
    async fn test_list_operations() {
        let (_shards, client) = client(1);
        let global = client.global();

        global.add("queue", json!(1)).await.unwrap();
        global.add("queue", json!(2)).await.unwrap();
        assert_eq!(global.count("queue").await.unwrap(), 2);

        assert_eq!(global.pop("queue").await.unwrap(), Some(json!(2)));
        assert_eq!(global.remove("queue").await.unwrap(), Some(json!([1])));
        assert!(!global.has_key("queue").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_ranges_are_namespaced() {
        let (shards, client) = client(2);
        let global = client.global();

        global
            .splice("letters", 0, 0, vec![json!("a"), json!("b"), json!("c")])
            .await
            .unwrap();
        assert_eq!(
            global.get_range("letters", 1, None).await.unwrap(),
            Some(json!(["b", "c"]))
        );
        assert_eq!(
            global.remove_range("letters", 0, Some(1)).await.unwrap(),
            Some(json!(["a"]))
        );

        let stored = shards[0]
            .get(&["__global", "data", "letters"].map(String::from))
            .await
            .unwrap();
        assert_eq!(stored, Some(json!(["b", "c"])));
    }

    #[tokio::test]
    async fn test_remove_all_and_expiry() {
        let (_shards, client) = client(1);
        let global = client.global();
        global.set("a", json!(1)).await.unwrap();
        global.set("b", json!(2)).await.unwrap();

        global.expire(&["a"], 0).await.unwrap();
        assert_eq!(global.get("a").await.unwrap(), None);
        assert_eq!(global.get("b").await.unwrap(), Some(json!(2)));

        global.expire(&["b"], 0).await.unwrap();
        global.unexpire(&["b"]).await.unwrap();
        assert_eq!(global.get("b").await.unwrap(), Some(json!(2)));

        global.remove_all().await.unwrap();
        assert_eq!(global.get_all().await.unwrap(), json!({}));
    }

    #[tokio::test]
    async fn test_query_runs_relative_to_namespace() {
        let (_shards, client) = client(2);
        let global = client.global();
        global.set("rooms.lobby", json!({"users": 3})).await.unwrap();
        global.set("rooms.games", json!({"users": 1})).await.unwrap();

        let count = global
            .query(&Query {
                kind: QueryKind::Count,
                path: vec!["rooms".to_string()],
                map_index: None,
            })
            .await
            .unwrap();

        assert_eq!(count, json!(2));
    }

    #[tokio::test]
    async fn test_public_mapper_swap() {
        let (shards, client) = client(2);
        let global = client.global();
        assert_eq!(
            global.map(&RoutingKey::from("anything"), Operation::Set),
            Route::One(ShardId(0))
        );

        global.set_mapper(Arc::new(
            |_key: &RoutingKey, _op: Operation, ids: &[ShardId]| Route::One(ids[ids.len() - 1]),
        ));
        global.set("moved", json!(true)).await.unwrap();

        let on_last = shards[1]
            .get(&["__global", "data", "moved"].map(String::from))
            .await
            .unwrap();
        assert_eq!(on_last, Some(json!(true)));
        assert!(!shards[0].has_key(&["__global".to_string()]).await.unwrap());
    }

    // ============================================================
    // CLUSTER CLIENT
    // ============================================================

    #[tokio::test]
    async fn test_ready_once_all_shards_reachable() {
        let (_shards, client) = client(3);

        tokio::time::timeout(Duration::from_secs(1), client.ready())
            .await
            .unwrap();
        assert!(client.is_ready());

        let (tx, rx) = tokio::sync::oneshot::channel();
        client.on_ready(move || {
            let _ = tx.send(());
        });
        rx.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_shard_reports_connect_timeout() {
        let mut opts = options(2);
        opts.connect_timeout_ms = 30;
        let shards = MemoryShard::for_addresses(&opts.stores);
        shards[1].set_available(false);
        let connections: Vec<Arc<dyn ShardConnection>> = shards
            .iter()
            .map(|shard| shard.clone() as Arc<dyn ShardConnection>)
            .collect();

        let client = IoClusterClient::new(&opts, connections);
        let mut events = client.events();

        assert!(matches!(
            next(&mut events).await,
            ClusterEvent::Error(ClusterError::ConnectTimeout { .. })
        ));
        assert!(!client.is_ready());
    }

    #[tokio::test]
    async fn test_publish_excluding_skips_sender() {
        let (_shards, client) = client(2);
        let sender = socket("sender");
        let listener = socket("listener");
        client.bind(sender.clone()).unwrap().subscribe("chat").await.unwrap();
        client.bind(listener.clone()).unwrap().subscribe("chat").await.unwrap();

        client
            .publish_excluding("chat", json!("hello"), &sender.id)
            .await
            .unwrap();

        eventually(|| listener.packets.lock().len() == 1).await;
        assert!(sender.packets.lock().is_empty());
    }

    #[tokio::test]
    async fn test_global_client_watcher_receives_socket_channel_traffic() {
        let (_shards, client) = client(2);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        client.global().watch(
            "news",
            Arc::new(move |data: &serde_json::Value| sink.lock().push(data.clone())),
        );
        client.bind(socket("reader")).unwrap().subscribe("news").await.unwrap();

        client.publish("news", json!({"n": 1})).await.unwrap();

        eventually(|| seen.lock().len() == 1).await;
        assert_eq!(seen.lock()[0], json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_bind_without_id_is_returned_to_caller_only() {
        struct Nameless;
        impl Socket for Nameless {
            fn id(&self) -> Option<SocketId> {
                None
            }
            fn emit_raw(&self, _packet: &ChannelPacket) {}
            fn kick_out(&self, _notice: &KickOutNotice) {}
        }
        let (_shards, client) = client(1);
        client.ready().await;
        let mut events = client.events();

        let err = client.bind(Arc::new(Nameless)).err().unwrap();
        assert_eq!(err, ClusterError::Handshake);
        assert!(err.should_drop_socket());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_destroy_drops_all_shard_subscriptions() {
        let (shards, client) = client(2);
        client.subscribe("news").await.unwrap();
        client.subscribe("weather").await.unwrap();

        client.destroy().await.unwrap();

        assert!(shards[0].subscribed_channels().is_empty());
        assert!(shards[1].subscribed_channels().is_empty());
    }
}
