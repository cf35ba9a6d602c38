use anyhow::{Context, Result, anyhow};
use clap::Parser;
use shardkv::{
    ClusterConfig, DurabilityMode, HttpLeaderClient, ReplicationAgent, ReplicationConfig,
    StorageEngine, StorageMode, StorageOptions, node_app,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "shardkv")]
#[command(about = "Statically sharded key-value node with leader to follower replication")]
struct Cli {
    /// Storage directory of this node.
    #[arg(long)]
    db_location: PathBuf,

    #[arg(long, default_value = "127.0.0.1:8080")]
    http_addr: SocketAddr,

    /// TOML shard table shared by every node.
    #[arg(long, default_value = "sharding.toml")]
    config_file: PathBuf,

    /// Name of this node's shard in the shard table.
    #[arg(long)]
    shard: String,

    /// Run as a read-only follower of the shard's leader.
    #[arg(long)]
    replica: bool,

    /// Copy a leader's storage directory into --db-location before opening it.
    #[arg(long, requires = "replica")]
    bootstrap_from: Option<PathBuf>,

    #[arg(long, default_value_t = 100)]
    idle_backoff_ms: u64,

    #[arg(long, default_value_t = 1000)]
    error_backoff_ms: u64,

    /// Timeout for forwarded requests and replication calls.
    #[arg(long, default_value_t = 5000)]
    request_timeout_ms: u64,

    #[arg(long, default_value = "sync")]
    durability: DurabilityMode,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cluster = ClusterConfig::from_file(&cli.config_file)
        .with_context(|| format!("failed to load shard table {}", cli.config_file.display()))?;
    let topology = Arc::new(
        cluster
            .topology(&cli.shard)
            .with_context(|| format!("invalid shard table for shard {:?}", cli.shard))?,
    );
    info!(
        shard = %cli.shard,
        index = topology.self_index(),
        shard_count = topology.shard_count(),
        replica = cli.replica,
        "shard topology loaded"
    );

    if let Some(source) = cli.bootstrap_from.as_ref() {
        if source == &cli.db_location {
            return Err(anyhow!("--bootstrap-from must differ from --db-location"));
        }
        StorageEngine::bootstrap_from(source, &cli.db_location)
            .with_context(|| format!("failed to bootstrap from {}", source.display()))?;
    }

    let mode = if cli.replica {
        StorageMode::ReadOnly
    } else {
        StorageMode::Writable
    };
    let storage = Arc::new(
        StorageEngine::open(
            &cli.db_location,
            StorageOptions::default()
                .mode(mode)
                .durability(cli.durability),
        )
        .with_context(|| format!("failed to open storage at {}", cli.db_location.display()))?,
    );

    let request_timeout = Duration::from_millis(cli.request_timeout_ms);
    let replication = if cli.replica {
        let leader = topology.leader_address().to_string();
        let client = HttpLeaderClient::new(leader.clone(), request_timeout)
            .context("failed to build replication client")?;
        let config = ReplicationConfig {
            idle_backoff: Duration::from_millis(cli.idle_backoff_ms),
            error_backoff: Duration::from_millis(cli.error_backoff_ms),
        };
        info!(leader = %leader, "starting replication from leader");
        Some(ReplicationAgent::new(storage.clone(), Arc::new(client), config).spawn())
    } else {
        None
    };

    let app = node_app(storage.clone(), topology.clone(), request_timeout)
        .context("failed to build HTTP app")?;
    let listener = tokio::net::TcpListener::bind(cli.http_addr)
        .await
        .with_context(|| format!("failed to bind to {}", cli.http_addr))?;

    info!(address = %cli.http_addr, shard = topology.self_index(), "shardkv node started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    if let Some(handle) = replication {
        if handle.is_finished() {
            warn!("replication agent exited before shutdown");
        }
        handle.stop().await;
    }
    storage.close().context("failed to close storage")?;
    info!("shardkv node stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("shardkv=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
