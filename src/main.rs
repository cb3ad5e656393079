use anyhow::Context;
use io_cluster::client::cluster_client::IoClusterClient;
use io_cluster::config::ClusterOptions;
use io_cluster::gateway::handlers::router;
use io_cluster::shard::connection::ShardConnection;
use io_cluster::shard::memory::MemoryShard;
use io_cluster::supervisor::launcher::CommandLauncher;
use io_cluster::supervisor::service::ShardSupervisor;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

const DEFAULT_HTTP_ADDR: &str = "127.0.0.1:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        // .with_max_level(tracing::Level::DEBUG)
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 3 {
        eprintln!(
            "Usage: {} --store <address> [--store <address>...] [--config <file.json>] \
             [--store-controller <path>] [--secret-key <key>] [--socket-channel-limit <n>] \
             [--http <addr:port>]",
            args[0]
        );
        eprintln!("Example: {} --store /tmp/s0.sock --store /tmp/s1.sock", args[0]);
        std::process::exit(1);
    }

    let mut config_path: Option<PathBuf> = None;
    let mut stores: Vec<String> = vec![];
    let mut store_controller: Option<PathBuf> = None;
    let mut secret_key: Option<String> = None;
    let mut channel_limit: Option<usize> = None;
    let mut http_addr: SocketAddr = DEFAULT_HTTP_ADDR.parse()?;

    let mut i = 1;
    while i < args.len() {
        let value = || {
            args.get(i + 1)
                .with_context(|| format!("{} needs a value", args[i]))
        };
        match args[i].as_str() {
            "--config" => {
                config_path = Some(value()?.into());
                i += 2;
            }
            "--store" => {
                stores.push(value()?.clone());
                i += 2;
            }
            "--store-controller" => {
                store_controller = Some(value()?.into());
                i += 2;
            }
            "--secret-key" => {
                secret_key = Some(value()?.clone());
                i += 2;
            }
            "--socket-channel-limit" => {
                channel_limit = Some(value()?.parse()?);
                i += 2;
            }
            "--http" => {
                http_addr = value()?.parse()?;
                i += 2;
            }
            other => {
                tracing::warn!("Ignoring unknown argument {}", other);
                i += 1;
            }
        }
    }

    // 1. Options: config file first, flags on top
    let mut options = match &config_path {
        Some(path) => ClusterOptions::from_json_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => ClusterOptions::default(),
    };
    if !stores.is_empty() {
        options.stores = stores;
    }
    if store_controller.is_some() {
        options.store_controller_path = store_controller;
    }
    if secret_key.is_some() {
        options.secret_key = secret_key;
    }
    if channel_limit.is_some() {
        options.socket_channel_limit = channel_limit;
    }
    if options.stores.is_empty() {
        anyhow::bail!("at least one --store address is required");
    }

    tracing::info!("Coordinating {} store shard(s): {:?}", options.stores.len(), options.stores);

    // 2. Store processes, when a controller is configured:
    let supervisor = options.store_controller_path.clone().map(|program| {
        tracing::info!("Launching stores with {}", program.display());
        ShardSupervisor::start(&options, Arc::new(CommandLauncher::new(program)))
    });
    if let Some(supervisor) = &supervisor {
        supervisor.on_ready(|| tracing::info!("All store processes are ready"));
    }

    // 3. Coordination client over in-process shards:
    let connections: Vec<Arc<dyn ShardConnection>> = MemoryShard::for_addresses(&options.stores)
        .into_iter()
        .map(|shard| shard as Arc<dyn ShardConnection>)
        .collect();
    let client = IoClusterClient::new(&options, connections);
    client.on_ready(|| tracing::info!("Cluster client ready"));

    // 4. HTTP admin gateway:
    let app = router(client.clone());

    tracing::info!("HTTP server listening on {}", http_addr);
    tracing::info!("Press Ctrl+C to shutdown");

    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    // 5. Teardown:
    tracing::info!("Shutting down");
    client.destroy().await?;
    if let Some(supervisor) = supervisor {
        supervisor.destroy().await;
    }

    Ok(())
}
