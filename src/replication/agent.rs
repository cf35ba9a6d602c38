use super::client::LeaderClient;
use super::protocol::AckStatus;
use crate::core::{KvError, Result};
use crate::storage::StorageEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Backoff intervals of the replication loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationConfig {
    /// Sleep after the leader reported an empty queue.
    pub idle_backoff: Duration,
    /// Sleep after any failed fetch, apply or acknowledge.
    pub error_backoff: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::from_millis(100),
            error_backoff: Duration::from_secs(1),
        }
    }
}

/// Result of one poll/apply/acknowledge cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    QueueEmpty,
    Replicated { key: Vec<u8>, ack: AckStatus },
}

/// Follower-side loop draining the leader's pending replication queue.
///
/// Delivery is at-least-once: an entry is applied locally before it is
/// acknowledged, and re-applying the same value is a plain overwrite.
pub struct ReplicationAgent {
    storage: Arc<StorageEngine>,
    leader: Arc<dyn LeaderClient>,
    config: ReplicationConfig,
}

impl ReplicationAgent {
    pub fn new(
        storage: Arc<StorageEngine>,
        leader: Arc<dyn LeaderClient>,
        config: ReplicationConfig,
    ) -> Self {
        Self {
            storage,
            leader,
            config,
        }
    }

    pub fn config(&self) -> ReplicationConfig {
        self.config
    }

    /// Runs a single cycle without sleeping.
    ///
    /// # Examples
    ///
    /// ```
    /// use shardkv::replication::{LocalLeaderClient, ReplicationAgent, ReplicationConfig};
    /// use shardkv::{StorageEngine, StorageMode};
    /// use std::sync::Arc;
    ///
    /// # tokio_test::block_on(async {
    /// let leader = Arc::new(StorageEngine::in_memory(StorageMode::Writable).unwrap());
    /// let follower = Arc::new(StorageEngine::in_memory(StorageMode::ReadOnly).unwrap());
    /// leader.put(b"foo", b"bar").unwrap();
    ///
    /// let agent = ReplicationAgent::new(
    ///     follower.clone(),
    ///     Arc::new(LocalLeaderClient::new(leader.clone())),
    ///     ReplicationConfig::default(),
    /// );
    /// agent.step().await.unwrap();
    ///
    /// assert_eq!(follower.get(b"foo").unwrap(), b"bar");
    /// assert_eq!(leader.pending_len().unwrap(), 0);
    /// # });
    /// ```
    pub async fn step(&self) -> Result<StepOutcome> {
        let Some(entry) = self.leader.next_entry().await? else {
            return Ok(StepOutcome::QueueEmpty);
        };

        let storage = Arc::clone(&self.storage);
        let (key, value) = (entry.key.clone(), entry.value.clone());
        tokio::task::spawn_blocking(move || storage.apply_replicated(&key, &value))
            .await
            .map_err(|e| KvError::Io(format!("replication apply task failed: {}", e)))??;

        let ack = self.leader.acknowledge(&entry).await?;
        let key_text = String::from_utf8_lossy(&entry.key);
        match &ack {
            AckStatus::Acknowledged => debug!(key = %key_text, "replicated"),
            AckStatus::Mismatch { detail } => {
                info!(key = %key_text, %detail, "replicated stale value, newer one still queued")
            }
            AckStatus::Missing => debug!(key = %key_text, "pending entry already acknowledged"),
        }

        Ok(StepOutcome::Replicated {
            key: entry.key,
            ack,
        })
    }

    /// Loops until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Errors never end the loop; they are logged and retried after `error_backoff`.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(leader = self.leader.leader(), "replication agent started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let result = tokio::select! {
                result = self.step() => result,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let delay = match result {
                Ok(StepOutcome::Replicated { .. }) => continue,
                Ok(StepOutcome::QueueEmpty) => self.config.idle_backoff,
                Err(err) => {
                    warn!(leader = self.leader.leader(), error = %err, "replication step failed");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(leader = self.leader.leader(), "replication agent stopped");
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> ReplicationHandle {
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(self.run(receiver));
        ReplicationHandle { shutdown, task }
    }
}

/// Controls a spawned replication agent.
pub struct ReplicationHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReplicationHandle {
    /// Signals the agent and waits for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.task.await {
            error!(error = %err, "replication agent task failed");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::client::LocalLeaderClient;
    use crate::storage::{PendingEntry, StorageMode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn leader_and_follower() -> (Arc<StorageEngine>, Arc<StorageEngine>) {
        (
            Arc::new(StorageEngine::in_memory(StorageMode::Writable).unwrap()),
            Arc::new(StorageEngine::in_memory(StorageMode::ReadOnly).unwrap()),
        )
    }

    fn fast_config() -> ReplicationConfig {
        ReplicationConfig {
            idle_backoff: Duration::from_millis(1),
            error_backoff: Duration::from_millis(1),
        }
    }

    /// Overwrites the key on the leader between fetch and acknowledge.
    struct RacingLeader {
        inner: LocalLeaderClient,
        leader: Arc<StorageEngine>,
    }

    #[async_trait]
    impl LeaderClient for RacingLeader {
        fn leader(&self) -> &str {
            "racing"
        }

        async fn next_entry(&self) -> Result<Option<PendingEntry>> {
            self.inner.next_entry().await
        }

        async fn acknowledge(&self, entry: &PendingEntry) -> Result<AckStatus> {
            self.leader.put(&entry.key, b"newer")?;
            self.inner.acknowledge(entry).await
        }
    }

    /// Fails the first `failures` fetches with a transport error.
    struct FlakyLeader {
        inner: LocalLeaderClient,
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LeaderClient for FlakyLeader {
        fn leader(&self) -> &str {
            "flaky"
        }

        async fn next_entry(&self) -> Result<Option<PendingEntry>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(KvError::Transport("connection refused".to_string()));
            }
            self.inner.next_entry().await
        }

        async fn acknowledge(&self, entry: &PendingEntry) -> Result<AckStatus> {
            self.inner.acknowledge(entry).await
        }
    }

    #[tokio::test]
    async fn test_step_replicates_and_drains_queue() {
        let (leader, follower) = leader_and_follower();
        leader.put(b"foo", b"bar").unwrap();

        let agent = ReplicationAgent::new(
            follower.clone(),
            Arc::new(LocalLeaderClient::new(leader.clone())),
            fast_config(),
        );

        assert_eq!(
            agent.step().await.unwrap(),
            StepOutcome::Replicated {
                key: b"foo".to_vec(),
                ack: AckStatus::Acknowledged
            }
        );
        assert_eq!(agent.step().await.unwrap(), StepOutcome::QueueEmpty);
        assert!(leader.next_pending_replication().unwrap().is_none());
        assert_eq!(follower.get(b"foo").unwrap(), b"bar");
    }

    #[tokio::test]
    async fn test_step_on_empty_queue_does_nothing() {
        let (leader, follower) = leader_and_follower();
        let agent = ReplicationAgent::new(
            follower.clone(),
            Arc::new(LocalLeaderClient::new(leader)),
            fast_config(),
        );

        assert_eq!(agent.step().await.unwrap(), StepOutcome::QueueEmpty);
        assert!(follower.is_empty().unwrap());
    }

    #[tokio::test]
    async fn test_mismatch_keeps_newer_value_queued() {
        let (leader, follower) = leader_and_follower();
        leader.put(b"k", b"older").unwrap();
        let racing = RacingLeader {
            inner: LocalLeaderClient::new(leader.clone()),
            leader: leader.clone(),
        };
        let agent = ReplicationAgent::new(follower.clone(), Arc::new(racing), fast_config());

        match agent.step().await.unwrap() {
            StepOutcome::Replicated {
                ack: AckStatus::Mismatch { detail },
                ..
            } => assert!(detail.contains("expected older, got newer")),
            other => panic!("expected mismatch, got {:?}", other),
        }
        assert_eq!(follower.get(b"k").unwrap(), b"older");

        let pending = leader.next_pending_replication().unwrap().unwrap();
        assert_eq!(pending.value, b"newer".to_vec());

        // a plain client converges on the newer value
        let agent = ReplicationAgent::new(
            follower.clone(),
            Arc::new(LocalLeaderClient::new(leader.clone())),
            fast_config(),
        );
        agent.step().await.unwrap();
        assert_eq!(follower.get(b"k").unwrap(), b"newer");
        assert_eq!(leader.pending_len().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_is_returned_from_step() {
        let (leader, follower) = leader_and_follower();
        let flaky = FlakyLeader {
            inner: LocalLeaderClient::new(leader),
            failures: 1,
            calls: AtomicUsize::new(0),
        };
        let agent = ReplicationAgent::new(follower, Arc::new(flaky), fast_config());

        let err = agent.step().await.unwrap_err();
        assert!(err.is_transient());
        assert_eq!(agent.step().await.unwrap(), StepOutcome::QueueEmpty);
    }

    #[tokio::test]
    async fn test_spawned_agent_survives_errors_and_stops() {
        let (leader, follower) = leader_and_follower();
        leader.put(b"hello", b"world").unwrap();
        let flaky = FlakyLeader {
            inner: LocalLeaderClient::new(leader.clone()),
            failures: 3,
            calls: AtomicUsize::new(0),
        };

        let handle =
            ReplicationAgent::new(follower.clone(), Arc::new(flaky), fast_config()).spawn();

        let mut replicated = false;
        for _ in 0..500 {
            if follower.get(b"hello").is_ok() && leader.pending_len().unwrap() == 0 {
                replicated = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(replicated, "follower never caught up");
        assert!(!handle.is_finished());

        handle.stop().await;
        assert_eq!(follower.get(b"hello").unwrap(), b"world");
    }
}
