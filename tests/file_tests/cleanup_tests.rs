//! Tests for file cleanup, log compaction and export
//!
//! These tests verify:
//! - Sparse files are dissolved into the head file and deleted
//! - Live data survives dissolving byte for byte
//! - Cleanup waits while a store is uncommitted
//! - Compacted logs recover to the same entity locations
//! - Exported files open as a storage of their own

use std::sync::Arc;
use std::time::{Duration, Instant};

use channelstore::file::DirectoryFileProvider;
use channelstore::gc::MarkMonitor;
use channelstore::transactions::TransactionEntry;
use channelstore::{EntityLocation, StorageChannel, StorageConfig};

use crate::common::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(10)
}

fn location(storage: &StorageChannel, object_id: u64) -> EntityLocation {
    storage.entity_location(object_id).unwrap().unwrap()
}

/// A and B (360 bytes each) stay behind in file 1 once X (1680 bytes) moves to file 2
fn sparse_first_file(config: &StorageConfig) -> StorageChannel {
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(config, &monitor).unwrap();

    store(
        &mut storage,
        &[
            blob_of_length(10, 360),
            blob_of_length(11, 360),
            blob_of_length(12, 1680),
        ],
    )
    .unwrap();
    store(&mut storage, &[blob_of_length(12, 1680)]).unwrap();
    storage
}

// =============================================================================
// Dissolving Tests
// =============================================================================

#[test]
fn test_dissolve_moves_live_entities_and_deletes_file() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let mut storage = sparse_first_file(&config);

    let before = storage.statistics();
    assert_eq!(before.file_count, 2);
    assert_eq!(before.files[0].total_length, 2400);
    assert_eq!(before.files[0].data_length, 720);
    assert_eq!(before.live_data_length, 2400);

    assert!(storage.issue_file_cleanup(deadline()).unwrap());

    // A fills file 2 up to 2040, B does not fit the remaining 8 bytes
    assert_eq!(
        location(&storage, 10),
        EntityLocation {
            file_number: 2,
            position: 1680,
            length: 360,
        }
    );
    assert_eq!(
        location(&storage, 11),
        EntityLocation {
            file_number: 3,
            position: 0,
            length: 360,
        }
    );
    assert_eq!(location(&storage, 12).file_number, 2);

    assert!(!data_file_path(&path, 0, 1).exists());
    let after = storage.statistics();
    let numbers: Vec<u64> = after.files.iter().map(|f| f.number).collect();
    assert_eq!(numbers, vec![2, 3]);
    assert_eq!(after.live_data_length, before.live_data_length);

    let log = read_log(&transactions_path(&path, 0));
    assert!(log.iter().any(|e| matches!(
        e,
        TransactionEntry::Transfer {
            file_length: 2040,
            source_file_number: 1,
            source_offset: 0,
            ..
        }
    )));
    assert!(matches!(
        log.last(),
        Some(TransactionEntry::FileDeletion { file_number: 1, .. })
    ));
}

#[test]
fn test_dissolved_entities_read_back_from_new_files() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    {
        let mut storage = sparse_first_file(&config);
        assert!(storage.issue_file_cleanup(deadline()).unwrap());
    }

    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();

    assert_eq!(storage.load(10).unwrap(), Some(blob_of_length(10, 360)));
    assert_eq!(storage.load(11).unwrap(), Some(blob_of_length(11, 360)));
    assert_eq!(storage.load(12).unwrap(), Some(blob_of_length(12, 1680)));
    assert_eq!(location(&storage, 11).file_number, 3);
}

#[test]
fn test_cleanup_waits_for_uncommitted_store() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    {
        let monitor = Arc::new(MarkMonitor::new(1));
        let mut storage = open_channel(&config, &monitor).unwrap();
        store(&mut storage, &[blob_of_length(1, 100)]).unwrap();
        let timestamp = storage.clock().next();
        storage
            .import_records(timestamp, &[blob_of_length(2, 100)])
            .unwrap();
        assert_eq!(storage.statistics().file_count, 2);

        let pending = [blob_of_length(3, 100)];
        let timestamp = storage.clock().next();
        let positions = storage.prepare_store(timestamp, &pending).unwrap();
        assert_eq!(positions, vec![100]);
        let log_length = file_length(&transactions_path(&path, 0));

        // file 1 is sparse, but nothing moves before the commit
        assert!(!storage.issue_file_cleanup(deadline()).unwrap());
        assert!(!storage.issue_transactions_file_check(false).unwrap());
        assert_eq!(storage.statistics().file_count, 2);
        assert_eq!(file_length(&transactions_path(&path, 0)), log_length);

        storage.commit_store(&pending, &positions).unwrap();
        assert!(storage.issue_file_cleanup(deadline()).unwrap());

        assert_eq!(storage.statistics().file_count, 1);
        let moved = location(&storage, 1);
        let committed = location(&storage, 3);
        assert_eq!((moved.file_number, moved.position), (2, 200));
        assert_eq!((committed.file_number, committed.position), (2, 100));
    }

    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();
    assert_eq!(storage.load(1).unwrap(), Some(blob_of_length(1, 100)));
    assert_eq!(storage.load(2).unwrap(), Some(blob_of_length(2, 100)));
    assert_eq!(storage.load(3).unwrap(), Some(blob_of_length(3, 100)));
    assert_eq!(location(&storage, 1).position, 200);
}

#[test]
fn test_dense_files_are_left_alone() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();
    store(&mut storage, &[blob_of_length(1, 1024)]).unwrap();
    store(&mut storage, &[blob_of_length(2, 1024)]).unwrap();
    store(&mut storage, &[blob_of_length(3, 1024)]).unwrap();
    let log_length = file_length(&transactions_path(&path, 0));

    assert!(storage.issue_file_cleanup(deadline()).unwrap());

    assert_eq!(storage.statistics().file_count, 2);
    assert_eq!(file_length(&transactions_path(&path, 0)), log_length);
}

// =============================================================================
// Log Compaction Tests
// =============================================================================

#[test]
fn test_compacted_log_recovers_same_locations() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let log = transactions_path(&path, 0);
    let expected = {
        let mut storage = sparse_first_file(&config);
        assert!(storage.issue_file_cleanup(deadline()).unwrap());
        let uncompacted = file_length(&log);

        assert!(storage.issue_transactions_file_check(false).unwrap());
        assert!(file_length(&log) < uncompacted);
        (10..=12).map(|id| location(&storage, id)).collect::<Vec<_>>()
    };

    let entries = read_log(&log);
    assert!(matches!(
        entries.as_slice(),
        [
            TransactionEntry::FileCreation { file_number: 2, .. },
            TransactionEntry::Transfer { file_length: 2040, .. },
            TransactionEntry::FileCreation { file_number: 3, .. },
            TransactionEntry::Transfer { file_length: 360, .. },
            TransactionEntry::Store { file_length: 360, .. },
        ]
    ));

    let monitor = Arc::new(MarkMonitor::new(1));
    let storage = open_channel(&config, &monitor).unwrap();
    let recovered: Vec<_> = (10..=12).map(|id| location(&storage, id)).collect();
    assert_eq!(recovered, expected);
}

#[test]
fn test_size_checked_compaction_waits_for_threshold() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1)
        .transaction_file_maximum_size(200)
        .build()
        .unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();

    store(&mut storage, &[blob(1, 16)]).unwrap();
    assert!(!storage.issue_transactions_file_check(true).unwrap());

    for _ in 0..10 {
        store(&mut storage, &[blob(1, 16)]).unwrap();
    }
    assert!(file_length(&transactions_path(&path, 0)) > 200);
    assert!(storage.issue_transactions_file_check(true).unwrap());
    // creation, transfer and the closing store entry
    assert_eq!(file_length(&transactions_path(&path, 0)), 26 + 34 + 18);
}

// =============================================================================
// Export Tests
// =============================================================================

#[test]
fn test_exported_files_open_as_storage() {
    let (_temp, path) = setup_temp_storage();
    let (_export_temp, export_path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    {
        let mut storage = open_channel(&config, &monitor).unwrap();
        for id in 1..=20u64 {
            store(&mut storage, &[blob(id, 200)]).unwrap();
        }
        storage
            .export_data(&DirectoryFileProvider::new(&export_path))
            .unwrap();
    }

    let export_config = base_config(&export_path, 1).build().unwrap();
    let mut exported = open_channel(&export_config, &monitor).unwrap();

    assert_eq!(exported.cache().entity_count(), 20);
    for id in 1..=20u64 {
        assert_eq!(exported.load(id).unwrap(), Some(blob(id, 200)));
    }
}
