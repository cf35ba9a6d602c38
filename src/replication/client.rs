use super::protocol::{
    AckStatus, DELETE_REPLICATION_KEY_PATH, NEXT_REPLICATION_KEY_PATH, NextKeyValue,
};
use crate::cluster::http_base_url;
use crate::core::{KvError, Result};
use crate::storage::{PendingEntry, StorageEngine};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// The follower's view of its shard leader.
#[async_trait]
pub trait LeaderClient: Send + Sync {
    /// Address (or label) of the leader, for logs.
    fn leader(&self) -> &str;

    /// Fetches one pending entry; `None` when the queue is empty.
    async fn next_entry(&self) -> Result<Option<PendingEntry>>;

    /// Asks the leader to drop `entry` from its queue if the value still matches.
    async fn acknowledge(&self, entry: &PendingEntry) -> Result<AckStatus>;
}

/// Talks to the leader's replication endpoints over HTTP.
#[derive(Debug, Clone)]
pub struct HttpLeaderClient {
    client: reqwest::Client,
    leader: String,
    base_url: String,
}

impl HttpLeaderClient {
    pub fn new(leader: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KvError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(leader, client))
    }

    pub fn with_client(leader: impl Into<String>, client: reqwest::Client) -> Self {
        let leader = leader.into();
        let base_url = http_base_url(&leader);
        Self {
            client,
            leader,
            base_url,
        }
    }
}

#[async_trait]
impl LeaderClient for HttpLeaderClient {
    fn leader(&self) -> &str {
        &self.leader
    }

    async fn next_entry(&self) -> Result<Option<PendingEntry>> {
        let url = format!("{}{}", self.base_url, NEXT_REPLICATION_KEY_PATH);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KvError::Transport(format!(
                "leader {} answered {}: {}",
                self.leader, status, body
            )));
        }

        let next: NextKeyValue = response.json().await?;
        if let Some(error) = next.error {
            return Err(KvError::Transport(format!(
                "leader {} failed to read its queue: {}",
                self.leader, error
            )));
        }
        Ok(next.into_entry())
    }

    async fn acknowledge(&self, entry: &PendingEntry) -> Result<AckStatus> {
        let url = format!("{}{}", self.base_url, DELETE_REPLICATION_KEY_PATH);
        let key = String::from_utf8_lossy(&entry.key);
        let value = String::from_utf8_lossy(&entry.value);
        let response = self
            .client
            .get(&url)
            .query(&[("key", key.as_ref()), ("value", value.as_ref())])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        match status.as_u16() {
            200 if body == "ok" => Ok(AckStatus::Acknowledged),
            409 => Ok(AckStatus::Mismatch { detail: body }),
            404 => Ok(AckStatus::Missing),
            _ => Err(KvError::Transport(format!(
                "unexpected acknowledge response from {} ({}): {}",
                self.leader, status, body
            ))),
        }
    }
}

/// Reads the leader's engine in-process. Used by tests and single-process setups.
#[derive(Clone)]
pub struct LocalLeaderClient {
    leader: Arc<StorageEngine>,
    label: String,
}

impl LocalLeaderClient {
    pub fn new(leader: Arc<StorageEngine>) -> Self {
        Self {
            label: format!("local:{}", leader.path().display()),
            leader,
        }
    }
}

#[async_trait]
impl LeaderClient for LocalLeaderClient {
    fn leader(&self) -> &str {
        &self.label
    }

    async fn next_entry(&self) -> Result<Option<PendingEntry>> {
        self.leader.next_pending_replication()
    }

    async fn acknowledge(&self, entry: &PendingEntry) -> Result<AckStatus> {
        match self.leader.acknowledge_replication(&entry.key, &entry.value) {
            Ok(outcome) => Ok(AckStatus::from_outcome(outcome, &entry.key, &entry.value)),
            Err(KvError::NotFound(_)) => Ok(AckStatus::Missing),
            Err(err) => Err(err),
        }
    }
}
