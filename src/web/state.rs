use crate::cluster::{ShardRouter, ShardTopology};
use crate::rebalance::RebalancePurger;
use crate::storage::StorageEngine;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<StorageEngine>,
    pub router: ShardRouter,
    pub purger: RebalancePurger,
}

impl AppState {
    pub fn new(storage: Arc<StorageEngine>, router: ShardRouter) -> Self {
        let purger = RebalancePurger::new(Arc::clone(router.topology()), Arc::clone(&storage));
        Self {
            storage,
            router,
            purger,
        }
    }

    pub fn topology(&self) -> &ShardTopology {
        self.router.topology()
    }
}
