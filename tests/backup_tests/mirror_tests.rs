//! Tests for the engine's live backup mirror
//!
//! These tests verify:
//! - Stores reach the backup before shutdown completes
//! - Dissolving, file deletion and log compaction are mirrored
//! - A reopened engine continues an existing backup

use std::fs;
use std::path::Path;
use std::time::Duration;

use channelstore::file::{DirectoryFileProvider, FileProvider};
use channelstore::Engine;

use crate::common::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn assert_mirrored(base: &Path, backup: &Path, channels: usize) {
    let live = DirectoryFileProvider::new(base);
    let mirror = DirectoryFileProvider::new(backup);

    for channel in 0..channels {
        let live_files = live.collect_data_files(channel).unwrap();
        let mirror_files = mirror.collect_data_files(channel).unwrap();
        let numbers = |files: &[(u64, std::path::PathBuf)]| -> Vec<u64> {
            files.iter().map(|(n, _)| *n).collect()
        };
        assert_eq!(numbers(&live_files), numbers(&mirror_files));

        for ((number, live_path), (_, mirror_path)) in live_files.iter().zip(&mirror_files) {
            assert_eq!(
                fs::read(live_path).unwrap(),
                fs::read(mirror_path).unwrap(),
                "data file {} of channel {} differs",
                number,
                channel
            );
        }
        assert_eq!(
            fs::read(live.transactions_file(channel)).unwrap(),
            fs::read(mirror.transactions_file(channel)).unwrap(),
            "transactions file of channel {} differs",
            channel
        );
    }
}

// =============================================================================
// Mirror Tests
// =============================================================================

#[test]
fn test_stores_are_mirrored() {
    let (_temp, path) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();
    let config = base_config(&path, 2).backup_dir(&backup).build().unwrap();

    let engine = Engine::open(config, dictionary()).unwrap();
    for id in 1..=40u64 {
        engine.store(&[blob(id, 200)]).unwrap();
    }
    engine.store(&[blob(3, 8), blob(4, 8)]).unwrap();
    engine.shutdown().unwrap();

    assert_mirrored(&path, &backup, 2);
    assert!(DirectoryFileProvider::new(&backup).collect_data_files(0).unwrap().len() > 1);
}

#[test]
fn test_cleanup_and_compaction_are_mirrored() {
    let (_temp, path) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();
    let config = base_config(&path, 1).backup_dir(&backup).build().unwrap();

    let engine = Engine::open(config, dictionary()).unwrap();
    engine
        .store(&[
            blob_of_length(10, 360),
            blob_of_length(11, 360),
            blob_of_length(12, 1680),
        ])
        .unwrap();
    engine.store(&[blob_of_length(12, 1680)]).unwrap();
    assert!(engine.issue_file_cleanup(Duration::from_secs(10)).unwrap());
    assert!(engine.issue_transactions_file_check(false).unwrap());
    engine.shutdown().unwrap();

    assert!(!data_file_path(&backup, 0, 1).exists());
    assert_mirrored(&path, &backup, 1);
}

#[test]
fn test_reopened_engine_continues_backup() {
    let (_temp, path) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();
    let config = base_config(&path, 2).backup_dir(&backup).build().unwrap();

    {
        let engine = Engine::open(config.clone(), dictionary()).unwrap();
        engine.store(&[blob(1, 32), blob(2, 32)]).unwrap();
        engine.shutdown().unwrap();
    }
    {
        let engine = Engine::open(config, dictionary()).unwrap();
        engine.store(&[blob(3, 32), blob(4, 32)]).unwrap();
        engine.shutdown().unwrap();
    }

    assert_mirrored(&path, &backup, 2);
}

#[test]
fn test_backup_of_existing_storage() {
    let (_temp, path) = setup_temp_storage();
    let (_backup_temp, backup) = setup_temp_storage();

    {
        let engine = Engine::open(base_config(&path, 1).build().unwrap(), dictionary()).unwrap();
        for id in 1..=10u64 {
            engine.store(&[blob(id, 200)]).unwrap();
        }
        engine.shutdown().unwrap();
    }

    let config = base_config(&path, 1).backup_dir(&backup).build().unwrap();
    let engine = Engine::open(config, dictionary()).unwrap();
    engine.shutdown().unwrap();

    assert_mirrored(&path, &backup, 1);
}
