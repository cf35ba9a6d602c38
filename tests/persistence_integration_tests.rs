//! Integration tests for WAL persistence and crash recovery

use shardkv::storage::persistence::{SNAPSHOT_FILE_NAME, WAL_FILE_NAME};
use shardkv::{DurabilityMode, KvError, StorageEngine, StorageMode, StorageOptions};
use std::fs::OpenOptions;
use std::io::Write;
use tempfile::TempDir;

#[test]
fn test_commit_is_logged_before_return() {
    let temp_dir = TempDir::new().unwrap();
    let engine = StorageEngine::open(temp_dir.path(), StorageOptions::default()).unwrap();

    engine.put(b"users:1", b"alice").unwrap();

    let wal_path = temp_dir.path().join(WAL_FILE_NAME);
    assert!(wal_path.exists());
    assert!(std::fs::metadata(&wal_path).unwrap().len() > 0);
}

#[test]
fn test_crash_without_close_recovers_from_wal() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = StorageEngine::open(temp_dir.path(), StorageOptions::default()).unwrap();
        engine.put(b"k1", b"v1").unwrap();
        engine.put(b"k1", b"v2").unwrap();
        engine.put(b"k2", b"v3").unwrap();
        // dropped without close()
    }

    let engine = StorageEngine::open(temp_dir.path(), StorageOptions::default()).unwrap();
    assert_eq!(engine.get(b"k1").unwrap(), b"v2");
    assert_eq!(engine.get(b"k2").unwrap(), b"v3");
    assert_eq!(engine.pending_len().unwrap(), 2);
}

#[test]
fn test_torn_tail_is_discarded() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = StorageEngine::open(temp_dir.path(), StorageOptions::default()).unwrap();
        engine.put(b"durable", b"yes").unwrap();
    }

    // half-written frame: length prefix promising more bytes than exist
    let mut wal = OpenOptions::new()
        .append(true)
        .open(temp_dir.path().join(WAL_FILE_NAME))
        .unwrap();
    wal.write_all(&64u32.to_le_bytes()).unwrap();
    wal.write_all(&[1, 2, 3]).unwrap();
    drop(wal);

    let engine = StorageEngine::open(temp_dir.path(), StorageOptions::default()).unwrap();
    assert_eq!(engine.get(b"durable").unwrap(), b"yes");

    // the store keeps accepting writes after the truncation
    engine.put(b"after", b"crash").unwrap();
    drop(engine);
    let engine = StorageEngine::open(temp_dir.path(), StorageOptions::default()).unwrap();
    assert_eq!(engine.get(b"after").unwrap(), b"crash");
}

#[test]
fn test_close_writes_snapshot_and_empties_wal() {
    let temp_dir = TempDir::new().unwrap();
    let engine = StorageEngine::open(
        temp_dir.path(),
        StorageOptions::default().durability(DurabilityMode::Async),
    )
    .unwrap();
    for i in 0..10 {
        engine
            .put(format!("k{}", i).as_bytes(), b"v")
            .unwrap();
    }
    engine.close().unwrap();

    assert!(temp_dir.path().join(SNAPSHOT_FILE_NAME).exists());
    assert_eq!(
        std::fs::metadata(temp_dir.path().join(WAL_FILE_NAME))
            .unwrap()
            .len(),
        0
    );

    let engine = StorageEngine::open(temp_dir.path(), StorageOptions::read_only()).unwrap();
    assert_eq!(engine.len().unwrap(), 10);
    assert!(matches!(engine.put(b"x", b"y"), Err(KvError::ReadOnly)));
}

#[test]
fn test_in_memory_store_leaves_no_files() {
    let temp_dir = TempDir::new().unwrap();
    let dir = temp_dir.path().join("never-created");
    let engine = StorageEngine::open(
        &dir,
        StorageOptions::default()
            .mode(StorageMode::Writable)
            .durability(DurabilityMode::None),
    )
    .unwrap();
    engine.put(b"k", b"v").unwrap();
    engine.close().unwrap();
    assert!(!dir.exists());
}
