// ============================================================================
// ShardKV Library
// ============================================================================

pub mod cluster;
pub mod config;
pub mod core;
pub mod rebalance;
pub mod replication;
pub mod storage;
pub mod web;

// Re-export main types for convenience
pub use cluster::{
    ForwardRequest, ForwardResponse, HttpForwarder, InMemoryForwarder, RouteOutcome,
    ShardForwarder, ShardRouter, ShardTopology, stable_shard_for,
};
pub use config::{ClusterConfig, ShardConfig};
pub use core::{KvError, Result};
pub use rebalance::RebalancePurger;
pub use replication::{
    HttpLeaderClient, LeaderClient, LocalLeaderClient, ReplicationAgent, ReplicationConfig,
    ReplicationHandle,
};
pub use storage::{DurabilityMode, StorageEngine, StorageMode, StorageOptions};
pub use web::{AppState, build_router};

/// Builds the axum app for one node from its storage and topology,
/// forwarding foreign keys over HTTP.
///
/// # Examples
///
/// ```
/// use shardkv::{StorageEngine, StorageMode, ShardTopology};
/// use std::sync::Arc;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = Arc::new(StorageEngine::in_memory(StorageMode::Writable)?);
/// let topology = Arc::new(ShardTopology::new(0, vec!["127.0.0.1:8080".to_string()])?);
/// let app = shardkv::node_app(storage, topology, std::time::Duration::from_secs(5))?;
/// # let _ = app;
/// # Ok(())
/// # }
/// ```
pub fn node_app(
    storage: std::sync::Arc<StorageEngine>,
    topology: std::sync::Arc<ShardTopology>,
    request_timeout: std::time::Duration,
) -> Result<axum::Router> {
    let forwarder = std::sync::Arc::new(HttpForwarder::new(request_timeout)?);
    let router = ShardRouter::new(topology, forwarder);
    Ok(build_router(AppState::new(storage, router)))
}
