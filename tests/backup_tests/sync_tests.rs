//! Tests for startup synchronization of the backup
//!
//! These tests verify:
//! - An empty backup receives a full copy
//! - The last populated backup file is healed by appending
//! - Length drift anywhere else is a consistency error
//! - Backup files without a live counterpart are removed

use std::fs;

use channelstore::file::{DirectoryFileProvider, FileProvider};
use channelstore::transactions::TransactionEntry;
use channelstore::StoreError;

use crate::common::*;
use crate::{assert_same_content, backup_data_path, data_file, handler, transactions_file};

// =============================================================================
// Helper Functions
// =============================================================================

fn log_bytes(files: u64) -> Vec<u8> {
    let mut bytes = Vec::new();
    for number in 1..=files {
        TransactionEntry::FileCreation {
            timestamp: number * 2,
            file_length: 0,
            file_number: number,
        }
        .encode_into(&mut bytes);
        TransactionEntry::Store {
            timestamp: number * 2 + 1,
            file_length: 80,
        }
        .encode_into(&mut bytes);
    }
    bytes
}

// =============================================================================
// Synchronization Tests
// =============================================================================

#[test]
fn test_empty_backup_receives_full_copy() {
    let (_source_temp, source) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();

    let sources: Vec<_> = (1..=3u64)
        .map(|n| data_file(&source, n, &[blob(n * 10, 16), blob(n * 10 + 1, 16)]))
        .collect();
    let log = transactions_file(&source, &log_bytes(3));

    handler(&backup).synchronize(0, &sources, &log).unwrap();

    for (number, file) in (1..=3u64).zip(&sources) {
        assert_same_content(file, &backup_data_path(&backup, number));
    }
    assert_same_content(&log, &DirectoryFileProvider::new(&backup).transactions_file(0));
}

#[test]
fn test_last_backup_file_is_healed() {
    let (_source_temp, source) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();

    let first = [blob(1, 16), blob(2, 16)];
    let second = [blob(3, 16), blob(4, 16), blob(5, 16)];
    let sources = vec![data_file(&source, 1, &first), data_file(&source, 2, &second)];
    let log = transactions_file(&source, &log_bytes(2));

    // the backup missed the last record of file 2
    data_file(&backup, 1, &first);
    data_file(&backup, 2, &second[..2]);

    handler(&backup).synchronize(0, &sources, &log).unwrap();

    assert_same_content(&sources[0], &backup_data_path(&backup, 1));
    assert_same_content(&sources[1], &backup_data_path(&backup, 2));
}

#[test]
fn test_missing_newer_file_is_copied() {
    let (_source_temp, source) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();

    let sources = vec![
        data_file(&source, 1, &[blob(1, 16)]),
        data_file(&source, 2, &[blob(2, 16)]),
    ];
    let log = transactions_file(&source, &log_bytes(2));
    data_file(&backup, 1, &[blob(1, 16)]);

    handler(&backup).synchronize(0, &sources, &log).unwrap();

    assert_same_content(&sources[1], &backup_data_path(&backup, 2));
}

#[test]
fn test_drift_in_older_file_fails() {
    let (_source_temp, source) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();

    let first = [blob(1, 16), blob(2, 16)];
    let sources = vec![
        data_file(&source, 1, &first),
        data_file(&source, 2, &[blob(3, 16)]),
    ];
    let log = transactions_file(&source, &log_bytes(2));
    data_file(&backup, 1, &first[..1]);
    data_file(&backup, 2, &[blob(3, 16)]);

    let result = handler(&backup).synchronize(0, &sources, &log);

    assert!(matches!(result, Err(StoreError::Consistency(_))));
}

#[test]
fn test_longer_backup_file_fails() {
    let (_source_temp, source) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();

    let sources = vec![data_file(&source, 1, &[blob(1, 16)])];
    let log = transactions_file(&source, &log_bytes(1));
    data_file(&backup, 1, &[blob(1, 16), blob(2, 16)]);

    let result = handler(&backup).synchronize(0, &sources, &log);

    assert!(matches!(result, Err(StoreError::Consistency(_))));
}

#[test]
fn test_stale_backup_file_is_removed() {
    let (_source_temp, source) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();

    let sources = vec![data_file(&source, 2, &[blob(2, 16)])];
    let log = transactions_file(&source, &log_bytes(1));
    data_file(&backup, 1, &[blob(1, 16)]);
    data_file(&backup, 2, &[blob(2, 16)]);

    handler(&backup).synchronize(0, &sources, &log).unwrap();

    assert!(!backup_data_path(&backup, 1).exists());
    assert_same_content(&sources[0], &backup_data_path(&backup, 2));
}

#[test]
fn test_differing_transactions_copy_is_replaced() {
    let (_source_temp, source) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();

    let sources = vec![data_file(&source, 1, &[blob(1, 16)])];
    let log = transactions_file(&source, &log_bytes(1));
    data_file(&backup, 1, &[blob(1, 16)]);
    let backup_log = DirectoryFileProvider::new(&backup).transactions_file(0);
    fs::write(&backup_log, &log_bytes(3)).unwrap();

    handler(&backup).synchronize(0, &sources, &log).unwrap();

    assert_same_content(&log, &backup_log);
}
