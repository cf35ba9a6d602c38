//! Pull-based leader to follower replication.

pub mod agent;
pub mod client;
pub mod protocol;

pub use agent::{ReplicationAgent, ReplicationConfig, ReplicationHandle, StepOutcome};
pub use client::{HttpLeaderClient, LeaderClient, LocalLeaderClient};
pub use protocol::{
    AckStatus, DELETE_REPLICATION_KEY_PATH, NEXT_REPLICATION_KEY_PATH, NextKeyValue,
};
