use super::persistence::{
    DurabilityMode, KeySpace, Namespace, PersistenceManager, WalEntry, WalOp, apply_op,
};
use crate::core::{KvError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, info, warn};

/// Whether the instance accepts client writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Shard leader: accepts `put` and owns the replication queue.
    #[default]
    Writable,
    /// Follower: only the replication agent writes, through `apply_replicated`.
    ReadOnly,
}

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct StorageOptions {
    pub mode: StorageMode,
    pub durability: DurabilityMode,
    /// WAL frames written before the engine folds them into a snapshot.
    pub checkpoint_threshold: usize,
    /// Maximum number of deletions committed per write-lock hold during a purge.
    pub purge_batch_size: usize,
}

impl Default for StorageOptions {
    fn default() -> Self {
        Self {
            mode: StorageMode::Writable,
            durability: DurabilityMode::Sync,
            checkpoint_threshold: 1000,
            purge_batch_size: 512,
        }
    }
}

impl StorageOptions {
    pub fn writable() -> Self {
        Self::default()
    }

    pub fn read_only() -> Self {
        Self::default().mode(StorageMode::ReadOnly)
    }

    pub fn mode(mut self, mode: StorageMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn durability(mut self, durability: DurabilityMode) -> Self {
        self.durability = durability;
        self
    }

    pub fn checkpoint_threshold(mut self, threshold: usize) -> Self {
        self.checkpoint_threshold = threshold.max(1);
        self
    }

    pub fn purge_batch_size(mut self, batch_size: usize) -> Self {
        self.purge_batch_size = batch_size.max(1);
        self
    }
}

/// A key/value awaiting confirmed application on the follower.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Result of a conditional acknowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The pending entry matched and was removed.
    Acknowledged,
    /// The entry was overwritten since it was fetched; it stays queued with `current`.
    Mismatch { current: Vec<u8> },
}

impl AckOutcome {
    /// Converts a mismatch into the taxonomy error, for callers that report it as text.
    pub fn into_mismatch_error(self, key: &[u8], expected: &[u8]) -> Option<KvError> {
        match self {
            AckOutcome::Acknowledged => None,
            AckOutcome::Mismatch { current } => Some(KvError::ReplicationMismatch {
                key: String::from_utf8_lossy(key).into_owned(),
                expected: String::from_utf8_lossy(expected).into_owned(),
                actual: String::from_utf8_lossy(&current).into_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PurgeReport {
    pub scanned: usize,
    pub deleted: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootstrapReport {
    pub copied: usize,
    pub skipped: usize,
}

struct StoreState {
    primary: KeySpace,
    pending: KeySpace,
    last_seq: u64,
    persistence: PersistenceManager,
}

/// Durable local key/value space with a separate pending-replication namespace.
///
/// Every mutating call is one transaction: it is appended to the WAL as a single
/// frame (and fsynced in `DurabilityMode::Sync`) before the in-memory maps change,
/// all under the write lock. Readers share the read lock.
pub struct StorageEngine {
    dir: PathBuf,
    options: StorageOptions,
    state: RwLock<StoreState>,
}

impl StorageEngine {
    /// Opens (or creates) the store in `dir` and recovers snapshot + WAL.
    pub fn open<P: AsRef<Path>>(dir: P, options: StorageOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        if options.durability != DurabilityMode::None {
            fs::create_dir_all(&dir).map_err(|e| {
                KvError::Io(format!(
                    "failed to create DB directory {}: {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let mut persistence = PersistenceManager::new(&dir, options.durability)?;
        persistence
            .wal_mut()
            .set_checkpoint_threshold(options.checkpoint_threshold);
        let recovered = persistence.recover()?;

        info!(
            path = %dir.display(),
            mode = ?options.mode,
            records = recovered.primary.len(),
            pending = recovered.pending.len(),
            "storage opened"
        );

        Ok(Self {
            dir,
            options,
            state: RwLock::new(StoreState {
                primary: recovered.primary,
                pending: recovered.pending,
                last_seq: recovered.last_seq,
                persistence,
            }),
        })
    }

    /// Opens a store that lives only in memory.
    pub fn in_memory(mode: StorageMode) -> Result<Self> {
        Self::open(
            PathBuf::new(),
            StorageOptions::default()
                .mode(mode)
                .durability(DurabilityMode::None),
        )
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn mode(&self) -> StorageMode {
        self.options.mode
    }

    pub fn is_read_only(&self) -> bool {
        self.options.mode == StorageMode::ReadOnly
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.is_read_only() {
            return Err(KvError::ReadOnly);
        }
        Ok(())
    }

    /// Logs `ops` as one frame, then applies them. Must be called under the write lock.
    fn commit(&self, state: &mut StoreState, ops: Vec<WalOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let seq = state.last_seq + 1;
        // A failed append still consumes its sequence number.
        state.last_seq = seq;
        let entry = WalEntry::new(seq, ops);
        state.persistence.log(&entry)?;
        for op in entry.ops {
            apply_op(&mut state.primary, &mut state.pending, op);
        }

        if state.persistence.needs_checkpoint() {
            // The transaction is already durable in the WAL; a failed checkpoint only
            // means the next one replays a longer log.
            if let Err(err) =
                state
                    .persistence
                    .checkpoint(state.last_seq, &state.primary, &state.pending)
            {
                warn!(error = %err, "checkpoint failed");
            }
        }
        Ok(())
    }

    /// Writes the record and creates or overwrites its pending replication entry.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_writable()?;
        let mut state = self.state.write()?;
        self.commit(
            &mut state,
            vec![
                WalOp::Put {
                    ns: Namespace::Primary,
                    key: key.to_vec(),
                    value: value.to_vec(),
                },
                WalOp::Put {
                    ns: Namespace::Replication,
                    key: key.to_vec(),
                    value: value.to_vec(),
                },
            ],
        )
    }

    /// Writes the record only; followers never re-replicate.
    pub fn apply_replicated(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut state = self.state.write()?;
        self.commit(
            &mut state,
            vec![WalOp::Put {
                ns: Namespace::Primary,
                key: key.to_vec(),
                value: value.to_vec(),
            }],
        )
    }

    pub fn get(&self, key: &[u8]) -> Result<Vec<u8>> {
        let state = self.state.read()?;
        state
            .primary
            .get(key)
            .cloned()
            .ok_or_else(|| KvError::not_found_key(key))
    }

    /// Returns the pending entry with the smallest key, if any.
    pub fn next_pending_replication(&self) -> Result<Option<PendingEntry>> {
        let state = self.state.read()?;
        Ok(state
            .pending
            .iter()
            .next()
            .map(|(key, value)| PendingEntry {
                key: key.clone(),
                value: value.clone(),
            }))
    }

    /// Deletes the pending entry for `key` only if it still holds `expected`.
    pub fn acknowledge_replication(&self, key: &[u8], expected: &[u8]) -> Result<AckOutcome> {
        self.ensure_writable()?;
        let mut state = self.state.write()?;
        let current = state.pending.get(key).cloned().ok_or_else(|| {
            KvError::NotFound(format!(
                "no pending replication entry for key {}",
                String::from_utf8_lossy(key)
            ))
        })?;
        if current != expected {
            debug!(key = %String::from_utf8_lossy(key), "acknowledge skipped: value changed");
            return Ok(AckOutcome::Mismatch { current });
        }
        self.commit(
            &mut state,
            vec![WalOp::Delete {
                ns: Namespace::Replication,
                key: key.to_vec(),
            }],
        )?;
        Ok(AckOutcome::Acknowledged)
    }

    /// Deletes every primary key for which `is_extra` holds.
    ///
    /// Candidates are collected under the read lock, then deleted in batches of
    /// `purge_batch_size`, each batch re-checking the key under its own write lock.
    /// Pending replication entries are never touched.
    pub fn purge_extraneous<F>(&self, is_extra: F) -> Result<PurgeReport>
    where
        F: Fn(&[u8]) -> bool,
    {
        self.ensure_writable()?;

        let (scanned, candidates) = {
            let state = self.state.read()?;
            let candidates = state
                .primary
                .keys()
                .filter(|key| is_extra(key))
                .cloned()
                .collect::<Vec<_>>();
            (state.primary.len(), candidates)
        };

        let mut deleted = 0usize;
        for batch in candidates.chunks(self.options.purge_batch_size) {
            let mut state = self.state.write()?;
            let ops = batch
                .iter()
                .filter(|key| state.primary.contains_key(key.as_slice()) && is_extra(key))
                .map(|key| WalOp::Delete {
                    ns: Namespace::Primary,
                    key: key.clone(),
                })
                .collect::<Vec<_>>();
            let batch_deleted = ops.len();
            self.commit(&mut state, ops)?;
            deleted += batch_deleted;
        }

        info!(scanned, deleted, "purged extraneous keys");
        Ok(PurgeReport { scanned, deleted })
    }

    /// Folds the WAL into a fresh snapshot.
    pub fn checkpoint(&self) -> Result<()> {
        let mut state = self.state.write()?;
        let StoreState {
            primary,
            pending,
            last_seq,
            persistence,
        } = &mut *state;
        persistence.checkpoint(*last_seq, primary, pending)
    }

    /// Checkpoints so the directory can be copied or reopened quickly.
    pub fn close(&self) -> Result<()> {
        self.checkpoint()?;
        info!(path = %self.dir.display(), "storage closed");
        Ok(())
    }

    /// Number of records in the primary namespace.
    pub fn len(&self) -> Result<usize> {
        Ok(self.state.read()?.primary.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of entries waiting in the replication queue.
    pub fn pending_len(&self) -> Result<usize> {
        Ok(self.state.read()?.pending.len())
    }

    /// Copies the on-disk state of `source` into `destination` before the follower opens it.
    ///
    /// Files that already exist at the destination are left alone, so re-running is a no-op.
    pub fn bootstrap_from<S, D>(source: S, destination: D) -> Result<BootstrapReport>
    where
        S: AsRef<Path>,
        D: AsRef<Path>,
    {
        let source = source.as_ref();
        let destination = destination.as_ref();
        fs::create_dir_all(destination).map_err(|e| {
            KvError::Io(format!(
                "failed to create replica directory {}: {}",
                destination.display(),
                e
            ))
        })?;

        let entries = fs::read_dir(source).map_err(|e| {
            KvError::Io(format!(
                "failed to read source DB directory {}: {}",
                source.display(),
                e
            ))
        })?;

        let mut report = BootstrapReport::default();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                debug!(path = %entry.path().display(), "bootstrap skipping non-file entry");
                continue;
            }
            let src_file = entry.path();
            let dst_file = destination.join(entry.file_name());
            if dst_file.exists() {
                report.skipped += 1;
                continue;
            }
            fs::copy(&src_file, &dst_file).map_err(|e| {
                KvError::Io(format!(
                    "failed to copy {} to {}: {}",
                    src_file.display(),
                    dst_file.display(),
                    e
                ))
            })?;
            fs::File::open(&dst_file)?.sync_all()?;
            report.copied += 1;
        }

        info!(
            source = %source.display(),
            destination = %destination.display(),
            copied = report.copied,
            skipped = report.skipped,
            "bootstrap finished"
        );
        Ok(report)
    }
}
