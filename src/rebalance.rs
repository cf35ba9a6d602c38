//! Removal of keys a node no longer owns after the shard table changed.

use crate::cluster::ShardTopology;
use crate::core::Result;
use crate::storage::{PurgeReport, StorageEngine};
use std::sync::Arc;
use tracing::info;

/// Deletes local records whose key resolves to another shard.
///
/// Safe to run next to live traffic: every deletion is re-checked under the
/// storage write lock, and a key written mid-sweep is caught by the next run.
#[derive(Clone)]
pub struct RebalancePurger {
    topology: Arc<ShardTopology>,
    storage: Arc<StorageEngine>,
}

impl RebalancePurger {
    pub fn new(topology: Arc<ShardTopology>, storage: Arc<StorageEngine>) -> Self {
        Self { topology, storage }
    }

    pub fn is_extra(&self, key: &[u8]) -> bool {
        !self.topology.is_local(key)
    }

    /// Runs one sweep. Blocking; call from a blocking context.
    pub fn purge(&self) -> Result<PurgeReport> {
        let report = self.storage.purge_extraneous(|key| self.is_extra(key))?;
        info!(
            shard = self.topology.self_index(),
            scanned = report.scanned,
            deleted = report.deleted,
            "rebalance purge finished"
        );
        Ok(report)
    }
}
