//! Shared fixtures for the integration test suites
//!
//! Every suite pulls this in with `#[path = "../common/mod.rs"]`, so not
//! every helper is used by every suite.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use channelstore::cache::{EntityCache, MapTypeDictionary, ReferenceLayout, TypeDictionary};
use channelstore::clock::TimestampProvider;
use channelstore::file::{
    DefaultDataFileEvaluator, DirectFileWriter, DirectoryFileProvider, FileManager, FileProvider,
    StorageInventory, SwitchableWriteController,
};
use channelstore::gc::MarkMonitor;
use channelstore::transactions::{process_file, EntryProcessor, TransactionEntry};
use channelstore::{encode_record, Result, StorageChannel, StorageConfig, StorageConfigBuilder};
use tempfile::TempDir;

// =============================================================================
// Types
// =============================================================================

/// Root type: the whole body is a list of reference ids
pub const ROOT_TYPE: u64 = 1;
/// Inner node: the whole body is a list of reference ids
pub const NODE_TYPE: u64 = 2;
/// Opaque payload without references
pub const BLOB_TYPE: u64 = 5;
/// Two leading reference ids, then an opaque payload
pub const LIST_TYPE: u64 = 7;

pub fn dictionary() -> Arc<dyn TypeDictionary> {
    Arc::new(
        MapTypeDictionary::new()
            .with_layout(ROOT_TYPE, ReferenceLayout::All)
            .with_layout(NODE_TYPE, ReferenceLayout::All)
            .with_layout(BLOB_TYPE, ReferenceLayout::None)
            .with_layout(LIST_TYPE, ReferenceLayout::Leading(2)),
    )
}

// =============================================================================
// Directories and Configuration
// =============================================================================

pub fn setup_temp_storage() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

/// Small files, no collection, no background interference
pub fn base_config(path: &Path, channels: usize) -> StorageConfigBuilder {
    StorageConfig::builder()
        .base_dir(path)
        .channel_count(channels)
        .data_file_size(1024, 2048)
        .data_file_minimum_use_ratio(0.75)
        .gc_enabled(false)
        .housekeeping_interval_ms(60_000)
}

/// Collection rooted at the highest object id of `ROOT_TYPE`
pub fn gc_config(path: &Path, channels: usize) -> StorageConfigBuilder {
    base_config(path, channels)
        .gc_enabled(true)
        .root_type_id(ROOT_TYPE)
        .marking_wait_time_ms(5)
}

// =============================================================================
// Records
// =============================================================================

/// Opaque record with a body of `body_length` bytes derived from the id
pub fn blob(object_id: u64, body_length: usize) -> Bytes {
    let body: Vec<u8> = (0..body_length)
        .map(|i| (object_id as usize + i) as u8)
        .collect();
    Bytes::from(encode_record(BLOB_TYPE, object_id, &body))
}

/// Opaque record with a total length of exactly `total_length` bytes
pub fn blob_of_length(object_id: u64, total_length: usize) -> Bytes {
    blob(object_id, total_length - channelstore::file::RECORD_HEADER_LENGTH)
}

/// Record whose body is the given reference ids
pub fn with_refs(type_id: u64, object_id: u64, references: &[u64]) -> Bytes {
    let body: Vec<u8> = references
        .iter()
        .flat_map(|id| id.to_le_bytes())
        .collect();
    Bytes::from(encode_record(type_id, object_id, &body))
}

// =============================================================================
// Channels
// =============================================================================

pub fn open_channel(config: &StorageConfig, monitor: &Arc<MarkMonitor>) -> Result<StorageChannel> {
    open_channel_with(config, 0, monitor, |cache| cache)
}

/// Build and recover one channel outside an engine
pub fn open_channel_with(
    config: &StorageConfig,
    channel: usize,
    monitor: &Arc<MarkMonitor>,
    customize: impl FnOnce(EntityCache) -> EntityCache,
) -> Result<StorageChannel> {
    let provider = Arc::new(DirectoryFileProvider::new(&config.base_dir));
    let clock = Arc::new(TimestampProvider::new());
    let files = FileManager::new(
        channel,
        Arc::clone(&provider) as Arc<dyn FileProvider>,
        Box::new(DirectFileWriter),
        Arc::new(DefaultDataFileEvaluator::new(config)),
        Arc::new(SwitchableWriteController::new()),
        Arc::clone(&clock),
    );
    let cache = customize(EntityCache::new(
        channel,
        config,
        dictionary(),
        Arc::clone(monitor),
    ));

    let mut storage = StorageChannel::new(
        cache,
        files,
        Arc::clone(monitor),
        clock,
        Duration::from_nanos(config.housekeeping_time_budget_ns),
    );
    storage.initialize(StorageInventory::read(channel, provider.as_ref())?, None)?;
    Ok(storage)
}

/// Store with a fresh timestamp from the channel's clock
pub fn store(storage: &mut StorageChannel, records: &[Bytes]) -> Result<usize> {
    let timestamp = storage.clock().next();
    storage.store(timestamp, records)
}

// =============================================================================
// Files
// =============================================================================

pub fn data_file_path(base: &Path, channel: usize, number: u64) -> PathBuf {
    DirectoryFileProvider::new(base).data_file(channel, number)
}

pub fn transactions_path(base: &Path, channel: usize) -> PathBuf {
    DirectoryFileProvider::new(base).transactions_file(channel)
}

pub fn file_length(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Every complete entry of a transactions log
pub fn read_log(path: &Path) -> Vec<TransactionEntry> {
    let mut collector = EntryCollector::default();
    process_file(path, &mut collector).unwrap();
    collector.entries
}

#[derive(Debug, Default)]
pub struct EntryCollector {
    pub entries: Vec<TransactionEntry>,
}

impl EntryProcessor for EntryCollector {
    fn accept(&mut self, _position: u64, bytes: &[u8]) -> Result<bool> {
        self.entries.push(TransactionEntry::decode(bytes)?);
        Ok(true)
    }
}
