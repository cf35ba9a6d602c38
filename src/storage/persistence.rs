//! Write-Ahead Logging (WAL) and snapshot files backing the storage engine

use crate::core::{KvError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

pub const WAL_FILE_NAME: &str = "shardkv.wal";
pub const SNAPSHOT_FILE_NAME: &str = "shardkv.snapshot";
const SNAPSHOT_FORMAT_VERSION: u32 = 1;

pub type KeySpace = BTreeMap<Vec<u8>, Vec<u8>>;

// ============================================================================
// WAL Entry Types
// ============================================================================

/// Logical keyspace a WAL operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Namespace {
    Primary,
    Replication,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalOp {
    Put {
        ns: Namespace,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    Delete {
        ns: Namespace,
        key: Vec<u8>,
    },
}

/// One committed transaction. A frame is either fully applied on recovery or not at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    pub seq: u64,
    pub ops: Vec<WalOp>,
}

impl WalEntry {
    pub fn new(seq: u64, ops: Vec<WalOp>) -> Self {
        Self { seq, ops }
    }
}

// ============================================================================
// Store Snapshot
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub last_seq: u64,
    pub primary: KeySpace,
    pub pending: KeySpace,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: u64,
    pub record_count: usize,
    pub pending_count: usize,
}

impl StoreSnapshot {
    pub fn new(last_seq: u64, primary: KeySpace, pending: KeySpace) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let metadata = SnapshotMetadata {
            created_at,
            record_count: primary.len(),
            pending_count: pending.len(),
        };

        Self {
            version: SNAPSHOT_FORMAT_VERSION,
            last_seq,
            primary,
            pending,
            metadata,
        }
    }
}

// ============================================================================
// Durability Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DurabilityMode {
    /// fsync after every committed transaction.
    #[default]
    Sync,
    /// Flush to the OS but leave syncing to it.
    Async,
    /// Memory only; nothing touches the disk.
    None,
}

impl std::str::FromStr for DurabilityMode {
    type Err = KvError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "sync" => Ok(Self::Sync),
            "async" => Ok(Self::Async),
            "none" | "memory" => Ok(Self::None),
            other => Err(KvError::Config(format!(
                "durability must be one of: sync, async, none (got '{}')",
                other
            ))),
        }
    }
}

// ============================================================================
// WAL Manager
// ============================================================================

pub struct WalManager {
    wal_path: PathBuf,
    wal_file: Option<BufWriter<File>>,
    /// Byte length of the prefix made of fully appended frames.
    committed_len: u64,
    durability_mode: DurabilityMode,
    entries_since_checkpoint: usize,
    checkpoint_threshold: usize,
}

/// Frames recovered from the WAL plus the byte length of the intact prefix.
pub struct WalReplay {
    pub entries: Vec<WalEntry>,
    pub valid_len: u64,
}

impl WalManager {
    pub fn new<P: AsRef<Path>>(wal_path: P, durability_mode: DurabilityMode) -> Result<Self> {
        let wal_path = wal_path.as_ref().to_path_buf();
        if durability_mode != DurabilityMode::None {
            if let Some(parent) = wal_path.parent() {
                fs::create_dir_all(parent).map_err(|e| {
                    KvError::Io(format!("Failed to create WAL directory: {}", e))
                })?;
            }
        }

        Ok(Self {
            wal_path,
            wal_file: None,
            committed_len: 0,
            durability_mode,
            entries_since_checkpoint: 0,
            checkpoint_threshold: 1000,
        })
    }

    /// Opens the WAL for appending, cutting off a torn tail left by a crash mid-append.
    pub fn open_for_append(&mut self, valid_len: u64) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.wal_path)
            .map_err(|e| KvError::Io(format!("Failed to open WAL file: {}", e)))?;
        let current_len = file
            .metadata()
            .map_err(|e| KvError::Io(format!("Failed to stat WAL file: {}", e)))?
            .len();
        if current_len > valid_len {
            warn!(
                path = %self.wal_path.display(),
                discarded_bytes = current_len - valid_len,
                "truncating torn WAL tail"
            );
            file.set_len(valid_len)
                .map_err(|e| KvError::Io(format!("Failed to truncate WAL: {}", e)))?;
        }
        self.committed_len = current_len.min(valid_len);
        self.wal_file = Some(BufWriter::new(file));
        Ok(())
    }

    /// Appends one frame. On failure nothing of the frame stays in the buffer or the file.
    pub fn append(&mut self, entry: &WalEntry) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let serialized = rmp_serde::to_vec(entry).map_err(|e| {
            KvError::Serialization(format!("Failed to serialize WAL entry: {}", e))
        })?;
        let mut frame = Vec::with_capacity(serialized.len() + 4);
        frame.extend_from_slice(&(serialized.len() as u32).to_le_bytes());
        frame.extend_from_slice(&serialized);

        if self.wal_file.is_none() {
            // An earlier rollback or clear lost the handle.
            self.open_for_append(self.committed_len)?;
        }
        let file = self
            .wal_file
            .as_mut()
            .ok_or_else(|| KvError::Io("WAL file not initialized".to_string()))?;
        match write_frame(file, &frame, self.durability_mode) {
            Ok(()) => {
                self.committed_len += frame.len() as u64;
                self.entries_since_checkpoint += 1;
                Ok(())
            }
            Err(e) => {
                self.discard_uncommitted();
                Err(KvError::Io(format!("Failed to append WAL frame: {}", e)))
            }
        }
    }

    /// Drops buffered bytes and cuts the file back to the last complete frame.
    fn discard_uncommitted(&mut self) {
        let Some(writer) = self.wal_file.take() else {
            return;
        };
        let (file, _unflushed) = writer.into_parts();
        match file.set_len(self.committed_len) {
            Ok(()) => self.wal_file = Some(BufWriter::new(file)),
            Err(e) => warn!(
                path = %self.wal_path.display(),
                error = %e,
                "failed to roll back WAL tail; reopening on next append"
            ),
        }
    }

    pub fn read_all(&self) -> Result<WalReplay> {
        if self.durability_mode == DurabilityMode::None || !self.wal_path.exists() {
            return Ok(WalReplay {
                entries: Vec::new(),
                valid_len: 0,
            });
        }
        let file = File::open(&self.wal_path)
            .map_err(|e| KvError::Io(format!("Failed to open WAL for reading: {}", e)))?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();
        let mut valid_len = 0u64;
        loop {
            let mut len_bytes = [0u8; 4];
            match reader.read_exact(&mut len_bytes) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(KvError::Io(format!(
                        "Failed to read WAL entry length: {}",
                        e
                    )));
                }
            }
            let len = u32::from_le_bytes(len_bytes) as usize;
            let mut data = vec![0u8; len];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => {
                    return Err(KvError::Io(format!("Failed to read WAL entry data: {}", e)));
                }
            }
            let entry: WalEntry = rmp_serde::from_slice(&data).map_err(|e| {
                KvError::Corruption(format!("Failed to deserialize WAL entry: {}", e))
            })?;
            entries.push(entry);
            valid_len += 4 + len as u64;
        }
        Ok(WalReplay { entries, valid_len })
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        self.wal_file = None;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.wal_path)
            .map_err(|e| KvError::Io(format!("Failed to truncate WAL: {}", e)))?;
        self.committed_len = 0;
        file.sync_all()
            .map_err(|e| KvError::Io(format!("Failed to sync WAL: {}", e)))?;
        drop(file);
        self.open_for_append(0)?;
        self.entries_since_checkpoint = 0;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.entries_since_checkpoint >= self.checkpoint_threshold
    }

    pub fn entries_since_checkpoint(&self) -> usize {
        self.entries_since_checkpoint
    }

    pub fn set_checkpoint_threshold(&mut self, threshold: usize) {
        self.checkpoint_threshold = threshold.max(1);
    }

    /// Moves appends to another file, keeping its current contents.
    #[cfg(test)]
    pub(crate) fn redirect(&mut self, wal_path: PathBuf) -> Result<()> {
        let len = fs::metadata(&wal_path).map(|m| m.len()).unwrap_or(0);
        self.wal_path = wal_path;
        self.wal_file = None;
        self.open_for_append(len)
    }
}

fn write_frame(
    file: &mut BufWriter<File>,
    frame: &[u8],
    durability_mode: DurabilityMode,
) -> std::io::Result<()> {
    file.write_all(frame)?;
    file.flush()?;
    if durability_mode == DurabilityMode::Sync {
        file.get_mut().sync_data()?;
    }
    Ok(())
}

// ============================================================================
// Snapshot Manager
// ============================================================================

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Writes the snapshot next to its final location and atomically renames it into place.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        let parent = self
            .snapshot_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&parent)
            .map_err(|e| KvError::Io(format!("Failed to create snapshot directory: {}", e)))?;
        let serialized = rmp_serde::to_vec(snapshot)
            .map_err(|e| KvError::Serialization(format!("Failed to serialize snapshot: {}", e)))?;

        let mut temp = tempfile::NamedTempFile::new_in(&parent)
            .map_err(|e| KvError::Io(format!("Failed to create temp file: {}", e)))?;
        temp.write_all(&serialized)
            .map_err(|e| KvError::Io(format!("Failed to write snapshot: {}", e)))?;
        temp.as_file()
            .sync_all()
            .map_err(|e| KvError::Io(format!("Failed to sync snapshot: {}", e)))?;
        temp.persist(&self.snapshot_path)
            .map_err(|e| KvError::Io(format!("Failed to rename snapshot: {}", e)))?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)
            .map_err(|e| KvError::Io(format!("Failed to open snapshot: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| KvError::Io(format!("Failed to read snapshot: {}", e)))?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| KvError::Corruption(format!("Failed to deserialize snapshot: {}", e)))?;
        if snapshot.version != SNAPSHOT_FORMAT_VERSION {
            return Err(KvError::Corruption(format!(
                "Unsupported snapshot format version {}",
                snapshot.version
            )));
        }
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}

// ============================================================================
// Persistence Manager
// ============================================================================

/// State rebuilt from the snapshot plus the WAL frames written after it.
pub struct RecoveredState {
    pub primary: KeySpace,
    pub pending: KeySpace,
    pub last_seq: u64,
}

pub struct PersistenceManager {
    wal: WalManager,
    snapshot: SnapshotManager,
    durability_mode: DurabilityMode,
}

impl PersistenceManager {
    pub fn new<P: AsRef<Path>>(data_dir: P, durability_mode: DurabilityMode) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let wal = WalManager::new(data_dir.join(WAL_FILE_NAME), durability_mode)?;
        let snapshot = SnapshotManager::new(data_dir.join(SNAPSHOT_FILE_NAME));
        Ok(Self {
            wal,
            snapshot,
            durability_mode,
        })
    }

    pub fn log(&mut self, entry: &WalEntry) -> Result<()> {
        self.wal.append(entry)
    }

    pub fn checkpoint(
        &mut self,
        last_seq: u64,
        primary: &KeySpace,
        pending: &KeySpace,
    ) -> Result<()> {
        if self.durability_mode == DurabilityMode::None {
            return Ok(());
        }
        let snapshot = StoreSnapshot::new(last_seq, primary.clone(), pending.clone());
        self.snapshot.save(&snapshot)?;
        self.wal.clear()?;
        Ok(())
    }

    pub fn needs_checkpoint(&self) -> bool {
        self.wal.needs_checkpoint()
    }

    /// Loads the snapshot, replays newer WAL frames and opens the WAL for appending.
    pub fn recover(&mut self) -> Result<RecoveredState> {
        let mut state = match self.snapshot.load()? {
            Some(snapshot) => RecoveredState {
                primary: snapshot.primary,
                pending: snapshot.pending,
                last_seq: snapshot.last_seq,
            },
            None => RecoveredState {
                primary: KeySpace::new(),
                pending: KeySpace::new(),
                last_seq: 0,
            },
        };

        let replay = self.wal.read_all()?;
        for entry in replay.entries {
            if entry.seq <= state.last_seq {
                continue;
            }
            for op in entry.ops {
                apply_op(&mut state.primary, &mut state.pending, op);
            }
            state.last_seq = entry.seq;
        }
        self.wal.open_for_append(replay.valid_len)?;
        Ok(state)
    }

    pub fn wal(&self) -> &WalManager {
        &self.wal
    }
    pub fn wal_mut(&mut self) -> &mut WalManager {
        &mut self.wal
    }
    pub fn snapshot(&self) -> &SnapshotManager {
        &self.snapshot
    }
    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability_mode
    }
}

/// Applies one logged operation to the in-memory keyspaces.
pub fn apply_op(primary: &mut KeySpace, pending: &mut KeySpace, op: WalOp) {
    match op {
        WalOp::Put { ns, key, value } => {
            let space = match ns {
                Namespace::Primary => primary,
                Namespace::Replication => pending,
            };
            space.insert(key, value);
        }
        WalOp::Delete { ns, key } => {
            let space = match ns {
                Namespace::Primary => primary,
                Namespace::Replication => pending,
            };
            space.remove(&key);
        }
    }
}
