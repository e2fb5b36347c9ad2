//! Tests for engine startup, shutdown and disruption handling
//!
//! These tests verify:
//! - Startup creates the storage layout and rejects bad configuration
//! - Corrupted storage aborts startup
//! - A store only some channels logged is discarded on restart
//! - Shutdown is idempotent and ends all processing
//! - Fatal errors disable processing, rejected writes do not

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;

use channelstore::file::{SwitchableWriteController, WriteController};
use channelstore::transactions::TransactionEntry;
use channelstore::{Engine, StorageConfig, StoreError};

use crate::common::*;

// =============================================================================
// Startup Tests
// =============================================================================

#[test]
fn test_open_creates_channel_files() {
    let (_temp, path) = setup_temp_storage();
    let base = path.join("store");

    let engine = Engine::open(base_config(&base, 2).build().unwrap(), dictionary()).unwrap();

    for channel in 0..2 {
        assert!(data_file_path(&base, channel, 1).exists());
        assert!(transactions_path(&base, channel).exists());
    }
    engine.shutdown().unwrap();
}

#[test]
fn test_invalid_channel_count_rejected() {
    let (_temp, path) = setup_temp_storage();

    let result = StorageConfig::builder()
        .base_dir(&path)
        .channel_count(3)
        .build();

    assert!(matches!(result, Err(StoreError::Config(_))));
}

#[test]
fn test_corrupted_storage_aborts_startup() {
    let (_temp, path) = setup_temp_storage();
    {
        let engine = Engine::open(base_config(&path, 1).build().unwrap(), dictionary()).unwrap();
        engine.store(&[blob(1, 16)]).unwrap();
        engine.shutdown().unwrap();
    }
    // data the log never documented, in a file the log never created
    fs::write(data_file_path(&path, 0, 7), blob(2, 16)).unwrap();

    let result = Engine::open(base_config(&path, 1).build().unwrap(), dictionary());

    assert!(matches!(result, Err(StoreError::Consistency(_))));
}

#[test]
fn test_store_missing_from_one_channel_is_discarded() {
    let (_temp, path) = setup_temp_storage();
    {
        let engine = Engine::open(base_config(&path, 2).build().unwrap(), dictionary()).unwrap();
        engine.store(&[blob(1, 16), blob(2, 16)]).unwrap();
        engine.shutdown().unwrap();
    }

    // a crash after channel 1 wrote and logged the next store, before channel 0 did
    let data = data_file_path(&path, 1, 1);
    let log = transactions_path(&path, 1);
    let last_timestamp = read_log(&log).last().unwrap().timestamp();
    let mut file = OpenOptions::new().append(true).open(&data).unwrap();
    file.write_all(&blob(3, 16)).unwrap();
    drop(file);
    let mut file = OpenOptions::new().append(true).open(&log).unwrap();
    file.write_all(
        &TransactionEntry::Store {
            timestamp: last_timestamp + 1000,
            file_length: 80,
        }
        .encode(),
    )
    .unwrap();
    drop(file);

    let engine = Engine::open(base_config(&path, 2).build().unwrap(), dictionary()).unwrap();

    assert_eq!(engine.load(3).unwrap(), None);
    assert_eq!(engine.load(1).unwrap(), Some(blob(1, 16)));
    assert_eq!(engine.load(2).unwrap(), Some(blob(2, 16)));
    assert_eq!(file_length(&data), 40);
    engine.shutdown().unwrap();
    assert!(matches!(
        read_log(&log).last(),
        Some(TransactionEntry::FileTruncation {
            file_length: 40,
            old_length: 80,
            ..
        })
    ));
}

// =============================================================================
// Shutdown Tests
// =============================================================================

#[test]
fn test_shutdown_is_idempotent() {
    let (_temp, path) = setup_temp_storage();
    let engine = Engine::open(base_config(&path, 2).build().unwrap(), dictionary()).unwrap();
    engine.store(&[blob(1, 8)]).unwrap();

    engine.shutdown().unwrap();
    engine.shutdown().unwrap();

    assert!(matches!(
        engine.store(&[blob(2, 8)]),
        Err(StoreError::ChannelUnavailable(_))
    ));
    assert!(matches!(
        engine.load(1),
        Err(StoreError::ChannelUnavailable(1))
    ));
    assert!(engine.statistics().is_err());
}

// =============================================================================
// Disruption Tests
// =============================================================================

#[test]
fn test_fatal_error_disables_processing() {
    let (_temp, path) = setup_temp_storage();
    let engine = Engine::open(base_config(&path, 1).build().unwrap(), dictionary()).unwrap();
    engine.store(&[blob(1, 16)]).unwrap();

    // the head file grows behind the engine's back
    let mut file = OpenOptions::new()
        .append(true)
        .open(data_file_path(&path, 0, 1))
        .unwrap();
    file.write_all(&[0u8; 16]).unwrap();
    drop(file);

    let result = engine.store(&[blob(1, 32)]);
    assert!(matches!(result, Err(StoreError::Consistency(_))));
    assert!(engine.operation_controller().has_disruptions());

    assert!(matches!(
        engine.load(1),
        Err(StoreError::ProcessingDisabled(_))
    ));
}

#[test]
fn test_read_only_storage_rejects_writes() {
    let (_temp, path) = setup_temp_storage();
    let controller = Arc::new(SwitchableWriteController::new());
    let engine = Engine::builder(base_config(&path, 1).build().unwrap(), dictionary())
        .write_controller(Arc::clone(&controller) as Arc<dyn WriteController>)
        .open()
        .unwrap();
    engine.store(&[blob(1, 16)]).unwrap();

    controller.set_writable(false);

    assert!(matches!(
        engine.store(&[blob(2, 16)]),
        Err(StoreError::ProcessingDisabled(_))
    ));
    assert!(matches!(
        engine.import(&[blob(2, 16)]),
        Err(StoreError::ProcessingDisabled(_))
    ));
    assert_eq!(engine.load(1).unwrap(), Some(blob(1, 16)));
    assert!(!engine.operation_controller().has_disruptions());
}
