//! Tests for storing into a channel's files
//!
//! These tests verify:
//! - Appending records to the head file and logging the store
//! - Rolling back an uncommitted store
//! - Head file rollover at the maximum file size
//! - Rejection of invalid records before anything is written

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;

use bytes::Bytes;
use channelstore::gc::MarkMonitor;
use channelstore::transactions::TransactionEntry;
use channelstore::{encode_record, EntityLocation, StoreError};

use crate::common::*;

// =============================================================================
// Store Tests
// =============================================================================

#[test]
fn test_store_appends_record_and_logs() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();

    let record = blob(100, 16);
    assert_eq!(record.len(), 40);
    assert_eq!(store(&mut storage, &[record.clone()]).unwrap(), 1);

    assert_eq!(
        storage.entity_location(100).unwrap(),
        Some(EntityLocation {
            file_number: 1,
            position: 0,
            length: 40,
        })
    );
    assert_eq!(storage.load(100).unwrap(), Some(record));
    assert_eq!(file_length(&data_file_path(&path, 0, 1)), 40);

    let log = read_log(&transactions_path(&path, 0));
    assert_eq!(log.len(), 2);
    assert!(matches!(
        log[0],
        TransactionEntry::FileCreation {
            file_length: 0,
            file_number: 1,
            ..
        }
    ));
    assert!(matches!(log[1], TransactionEntry::Store { file_length: 40, .. }));
}

#[test]
fn test_store_multiple_records_in_one_chunk() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();

    let mut chunk = blob(1, 8).to_vec();
    chunk.extend_from_slice(&blob(2, 16));
    chunk.extend_from_slice(&blob(3, 24));
    assert_eq!(store(&mut storage, &[Bytes::from(chunk)]).unwrap(), 3);

    let positions: Vec<u32> = (1..=3)
        .map(|id| storage.entity_location(id).unwrap().unwrap().position)
        .collect();
    assert_eq!(positions, vec![0, 32, 72]);
    assert_eq!(storage.cache().entity_count(), 3);
}

#[test]
fn test_store_new_version_shadows_old() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();

    store(&mut storage, &[blob(7, 16)]).unwrap();
    let newer = blob(7, 32);
    store(&mut storage, &[newer.clone()]).unwrap();

    let location = storage.entity_location(7).unwrap().unwrap();
    assert_eq!(location.position, 40);
    assert_eq!(location.length, 56);
    assert_eq!(storage.load(7).unwrap(), Some(newer));

    let stats = storage.statistics();
    assert_eq!(stats.live_data_length, 56);
    assert_eq!(stats.total_data_length, 96);
}

#[test]
fn test_store_rolls_over_full_head_file() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();

    store(&mut storage, &[blob_of_length(1, 1100)]).unwrap();
    store(&mut storage, &[blob_of_length(2, 1100)]).unwrap();
    store(&mut storage, &[blob_of_length(3, 100)]).unwrap();

    assert_eq!(storage.entity_location(2).unwrap().unwrap().file_number, 1);
    assert_eq!(
        storage.entity_location(3).unwrap(),
        Some(EntityLocation {
            file_number: 2,
            position: 0,
            length: 100,
        })
    );

    let stats = storage.statistics();
    assert_eq!(stats.file_count, 2);
    assert_eq!(stats.files[0].total_length, 2200);
    assert_eq!(stats.files[1].total_length, 100);
}

// =============================================================================
// Rollback Tests
// =============================================================================

#[test]
fn test_rollback_restores_committed_length() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let data_path = data_file_path(&path, 0, 1);

    {
        let mut storage = open_channel(&config, &monitor).unwrap();
        store(&mut storage, &[blob(100, 16)]).unwrap();

        let timestamp = storage.clock().next();
        storage.prepare_store(timestamp, &[blob(101, 16)]).unwrap();
        assert_eq!(file_length(&data_path), 80);

        storage.rollback_store().unwrap();
        assert_eq!(file_length(&data_path), 40);
        assert!(storage.cache().get_entry(101).is_none());

        let log = read_log(&transactions_path(&path, 0));
        assert!(matches!(
            log.last(),
            Some(TransactionEntry::FileTruncation {
                file_length: 40,
                file_number: 1,
                old_length: 80,
                ..
            })
        ));

        store(&mut storage, &[blob(102, 16)]).unwrap();
        assert_eq!(storage.entity_location(102).unwrap().unwrap().position, 40);
    }

    // the rolled back record stays gone after recovery
    let mut storage = open_channel(&config, &monitor).unwrap();
    assert!(storage.load(101).unwrap().is_none());
    assert_eq!(storage.load(102).unwrap(), Some(blob(102, 16)));
    assert_eq!(storage.cache().entity_count(), 2);
}

#[test]
fn test_head_length_mismatch_fails_store() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();
    store(&mut storage, &[blob(100, 16)]).unwrap();

    let mut file = OpenOptions::new()
        .append(true)
        .open(data_file_path(&path, 0, 1))
        .unwrap();
    file.write_all(&[0xAB; 12]).unwrap();
    drop(file);

    let result = store(&mut storage, &[blob(101, 16)]);

    assert!(matches!(result, Err(StoreError::Consistency(_))));
    assert!(storage.cache().get_entry(101).is_none());
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_invalid_records_rejected_before_write() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 2).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(2));
    let mut storage = open_channel(&config, &monitor).unwrap();
    store(&mut storage, &[blob(2, 16)]).unwrap();
    let log_length = file_length(&transactions_path(&path, 0));

    let unknown_type = Bytes::from(encode_record(77, 4, &[0u8; 8]));
    let foreign_channel = blob(3, 16);
    let type_change = with_refs(NODE_TYPE, 2, &[4]);
    let bad_layout = Bytes::from(encode_record(NODE_TYPE, 6, &[0u8; 5]));

    for record in [unknown_type, foreign_channel, type_change, bad_layout] {
        let result = store(&mut storage, &[record]);
        assert!(matches!(result, Err(StoreError::InvalidRecord { .. })));
    }

    assert_eq!(file_length(&data_file_path(&path, 0, 1)), 40);
    assert_eq!(file_length(&transactions_path(&path, 0)), log_length);
    assert_eq!(storage.cache().entity_count(), 1);
}
