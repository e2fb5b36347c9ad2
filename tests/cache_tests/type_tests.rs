//! Tests for type chains and type-based export
//!
//! These tests verify:
//! - Entities are chained per type
//! - Type export writes every current record of the type
//! - Type assignments survive recovery and cannot change

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;

use channelstore::file::{index_records, RecordSlot};
use channelstore::gc::MarkMonitor;
use channelstore::transactions::TransactionEntry;
use channelstore::{encode_record, StoreError};

use crate::common::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn exported_ids(bytes: &[u8]) -> BTreeSet<u64> {
    index_records(bytes, 0)
        .unwrap()
        .into_iter()
        .filter_map(|slot| match slot {
            RecordSlot::Entity { header, .. } => Some(header.object_id),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Type Chain Tests
// =============================================================================

#[test]
fn test_object_ids_grouped_by_type() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    let mut storage = open_channel(&config, &monitor).unwrap();

    store(
        &mut storage,
        &[
            blob(1, 8),
            with_refs(NODE_TYPE, 2, &[1]),
            blob(3, 8),
            with_refs(NODE_TYPE, 4, &[1, 3]),
            blob(5, 8),
        ],
    )
    .unwrap();

    assert_eq!(storage.cache().object_ids_of_type(BLOB_TYPE), vec![1, 3, 5]);
    assert_eq!(storage.cache().object_ids_of_type(NODE_TYPE), vec![2, 4]);
    assert!(storage.cache().object_ids_of_type(ROOT_TYPE).is_empty());

    let entity = storage.cache().get_entry(4).unwrap();
    assert_eq!(storage.cache().type_id_of(entity), NODE_TYPE);
    assert!(entity.has_references());
}

#[test]
fn test_type_chains_rebuilt_on_recovery() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    {
        let mut storage = open_channel(&config, &monitor).unwrap();
        store(&mut storage, &[blob(1, 8), with_refs(NODE_TYPE, 2, &[1])]).unwrap();
        store(&mut storage, &[blob(3, 8), blob(1, 16)]).unwrap();
    }

    let storage = open_channel(&config, &monitor).unwrap();

    let blobs: BTreeSet<u64> = storage
        .cache()
        .object_ids_of_type(BLOB_TYPE)
        .into_iter()
        .collect();
    assert_eq!(blobs, BTreeSet::from([1, 3]));
    assert_eq!(storage.cache().object_ids_of_type(NODE_TYPE), vec![2]);
}

#[test]
fn test_type_change_rejected_after_recovery() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));
    {
        let mut storage = open_channel(&config, &monitor).unwrap();
        store(&mut storage, &[blob(9, 8)]).unwrap();
    }

    let mut storage = open_channel(&config, &monitor).unwrap();
    let result = store(&mut storage, &[with_refs(NODE_TYPE, 9, &[])]);

    match result {
        Err(StoreError::InvalidRecord { object_id, cause }) => {
            assert_eq!(object_id, 9);
            assert!(cause.is_consistency_violation());
        }
        other => panic!("expected rejected record, got {:?}", other),
    }
}

#[test]
fn test_unknown_type_in_data_file_fails_recovery() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 1).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(1));

    let record = encode_record(42, 3, &[]);
    let data = data_file_path(&path, 0, 1);
    fs::create_dir_all(data.parent().unwrap()).unwrap();
    fs::write(&data, &record).unwrap();
    let mut log = Vec::new();
    TransactionEntry::FileCreation {
        timestamp: 1,
        file_length: 0,
        file_number: 1,
    }
    .encode_into(&mut log);
    TransactionEntry::Store {
        timestamp: 2,
        file_length: record.len() as u64,
    }
    .encode_into(&mut log);
    fs::write(transactions_path(&path, 0), log).unwrap();

    assert!(matches!(
        open_channel(&config, &monitor),
        Err(StoreError::UnknownType {
            type_id: 42,
            object_id: 3
        })
    ));
}

// =============================================================================
// Export Tests
// =============================================================================

#[test]
fn test_export_type_writes_current_versions() {
    let (_temp, path) = setup_temp_storage();
    let config = base_config(&path, 2).build().unwrap();
    let monitor = Arc::new(MarkMonitor::new(2));
    let mut storage = open_channel(&config, &monitor).unwrap();

    store(
        &mut storage,
        &[blob(2, 8), blob(4, 8), with_refs(NODE_TYPE, 6, &[2, 4])],
    )
    .unwrap();
    store(&mut storage, &[blob(4, 40)]).unwrap();

    let mut out = Vec::new();
    let written = storage.export_type(BLOB_TYPE, &mut out).unwrap();

    assert_eq!(written, out.len() as u64);
    assert_eq!(written, 32 + 64);
    assert_eq!(exported_ids(&out), BTreeSet::from([2, 4]));
    assert!(out.windows(64).any(|w| w == &blob(4, 40)[..]));

    let mut nodes = Vec::new();
    storage.export_type(NODE_TYPE, &mut nodes).unwrap();
    assert_eq!(nodes, with_refs(NODE_TYPE, 6, &[2, 4]).to_vec());
}
