pub mod engine;
pub mod persistence;

pub use engine::{
    AckOutcome, BootstrapReport, PendingEntry, PurgeReport, StorageEngine, StorageMode,
    StorageOptions,
};
pub use persistence::{DurabilityMode, PersistenceManager};
