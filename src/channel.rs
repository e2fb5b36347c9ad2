//! Storage Channel
//!
//! One shard of the object space: its entity cache and its files, driven by
//! a single thread.
//!
//! ## Responsibilities
//! - Store, load, import and export for the channel's object ids
//! - Two-phase stores coordinated across channels by the engine
//! - Deadline-bounded housekeeping: file cleanup, cache check, garbage
//!   collection and transactions log compaction
//!
//! ## Store sequence
//! ```text
//!   prepare_store ─► validate ─► register pending update ─► store_chunks ─┬─► commit_store
//!                                                                        │     commit_write
//!                                                                        │     post_store_put_entities
//!                                                                        │     clear pending update
//!                                                                        └─► rollback_store
//! ```

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{debug, info};

use crate::cache::{EntityCache, EntityCacheEvaluator};
use crate::clock::TimestampProvider;
use crate::error::{Result, StoreError};
use crate::file::{ChannelStatistics, FileManager, FileProvider, StorageInventory};
use crate::gc::MarkMonitor;

/// Where an entity's current record lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityLocation {
    pub file_number: u64,
    pub position: u32,
    pub length: u32,
}

/// A channel's cache and files
pub struct StorageChannel {
    channel: usize,
    cache: EntityCache,
    files: FileManager,
    monitor: Arc<MarkMonitor>,
    clock: Arc<TimestampProvider>,
    housekeeping_budget: Duration,
}

impl StorageChannel {
    pub fn new(
        cache: EntityCache,
        files: FileManager,
        monitor: Arc<MarkMonitor>,
        clock: Arc<TimestampProvider>,
        housekeeping_budget: Duration,
    ) -> Self {
        Self {
            channel: files.channel(),
            cache,
            files,
            monitor,
            clock,
            housekeeping_budget,
        }
    }

    /// Recover files, then register entities
    ///
    /// `consistent_store_timestamp` is the latest store logged by every
    /// channel; a younger head file store is discarded. Without it the
    /// channel's own latest store counts as complete.
    pub fn initialize(
        &mut self,
        inventory: StorageInventory,
        consistent_store_timestamp: Option<u64>,
    ) -> Result<usize> {
        if inventory.channel() != self.channel {
            return Err(StoreError::Initialization(format!(
                "inventory of channel {} handed to channel {}",
                inventory.channel(),
                self.channel
            )));
        }
        self.files.initialize(inventory, consistent_store_timestamp)?;
        self.cache.initialize_entities(&mut self.files)
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn cache(&self) -> &EntityCache {
        &self.cache
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    // =========================================================================
    // Store
    // =========================================================================

    /// Write phase: append and log, leaving the store uncommitted
    ///
    /// Records are validated first. A failed write is rolled back before the
    /// error is returned. Without records only the store entry is logged.
    pub fn prepare_store(&mut self, timestamp: u64, chunks: &[Bytes]) -> Result<Vec<u64>> {
        if chunks.is_empty() {
            return self.files.store_chunks(timestamp, chunks);
        }
        self.cache.validate_records(chunks)?;
        self.monitor.register_pending_store_update(self.channel);
        match self.files.store_chunks(timestamp, chunks) {
            Ok(positions) => Ok(positions),
            Err(e) => {
                let rollback = self.files.rollback_write();
                self.monitor.clear_pending_store_update(self.channel);
                rollback?;
                Err(e)
            }
        }
    }

    /// Commit phase: make the written records live
    pub fn commit_store(&mut self, chunks: &[Bytes], positions: &[u64]) -> Result<usize> {
        if chunks.is_empty() {
            self.files.commit_write()?;
            return Ok(0);
        }
        let result = self.commit_and_index(chunks, positions);
        self.monitor.clear_pending_store_update(self.channel);
        result
    }

    fn commit_and_index(&mut self, chunks: &[Bytes], positions: &[u64]) -> Result<usize> {
        self.files.commit_write()?;
        self.cache
            .post_store_put_entities(&mut self.files, chunks, positions)
    }

    /// Undo a prepared store
    pub fn rollback_store(&mut self) -> Result<()> {
        let result = self.files.rollback_write();
        self.monitor.clear_pending_store_update(self.channel);
        result
    }

    /// Prepare and commit in one go
    pub fn store(&mut self, timestamp: u64, chunks: &[Bytes]) -> Result<usize> {
        let positions = self.prepare_store(timestamp, chunks)?;
        self.commit_store(chunks, &positions)
    }

    /// Write phase of an import: records go to a fresh head file
    pub fn prepare_import(&mut self, timestamp: u64, chunks: &[Bytes]) -> Result<Vec<u64>> {
        if !chunks.is_empty() && self.files.head_file()?.total_length() > 0 {
            self.files.create_new_storage_file()?;
        }
        self.prepare_store(timestamp, chunks)
    }

    /// Write foreign records into a fresh head file
    pub fn import_records(&mut self, timestamp: u64, chunks: &[Bytes]) -> Result<usize> {
        let positions = self.prepare_import(timestamp, chunks)?;
        let count = self.commit_store(chunks, &positions)?;
        info!(channel = self.channel, entities = count, "imported records");
        Ok(count)
    }

    // =========================================================================
    // Load
    // =========================================================================

    /// Record bytes of `object_id`, header included
    pub fn load(&mut self, object_id: u64) -> Result<Option<Bytes>> {
        self.cache.load_data(&self.files, object_id)
    }

    pub fn entity_location(&self, object_id: u64) -> Result<Option<EntityLocation>> {
        let Some(entity) = self.cache.get_entry(object_id) else {
            return Ok(None);
        };
        let Some(file) = entity.file() else {
            return Ok(None);
        };
        Ok(Some(EntityLocation {
            file_number: self.files.ring().get(file)?.number(),
            position: entity.storage_position(),
            length: entity.length(),
        }))
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Copy the channel's live files into another directory layout
    pub fn export_data(&self, target: &dyn FileProvider) -> Result<()> {
        self.files.export_files(target)
    }

    /// Write every record of `type_id` in type order, returning the bytes written
    pub fn export_type(&self, type_id: u64, out: &mut dyn Write) -> Result<u64> {
        let mut written = 0u64;
        for entity in self.cache.type_chain(type_id) {
            let record = self.cache.read_record(&self.files, entity)?;
            out.write_all(&record)?;
            written += record.len() as u64;
        }
        debug!(channel = self.channel, type_id, bytes = written, "exported type");
        Ok(written)
    }

    pub fn statistics(&self) -> ChannelStatistics {
        self.files.raw_file_statistics()
    }

    // =========================================================================
    // Issued Housekeeping
    // =========================================================================

    pub fn issue_garbage_collection(
        &mut self,
        deadline: Instant,
        keep_running: &dyn Fn() -> bool,
    ) -> Result<bool> {
        self.cache
            .issued_garbage_collection(&mut self.files, deadline, keep_running)
    }

    pub fn issue_file_cleanup(&mut self, deadline: Instant) -> Result<bool> {
        self.files
            .issued_file_cleanup_check(self.cache.arena_mut(), deadline)
    }

    pub fn issue_cache_check(
        &mut self,
        deadline: Instant,
        evaluator: Option<&dyn EntityCacheEvaluator>,
    ) -> Result<bool> {
        self.cache
            .issued_entity_cache_check(&self.files, deadline, evaluator)
    }

    /// Continue the cache check cycle with the configured evaluator
    ///
    /// True once a whole cycle passed without clearing a payload.
    pub fn incremental_cache_check(&mut self, deadline: Instant) -> Result<bool> {
        self.cache
            .incremental_entity_cache_check(&self.files, deadline)
    }

    pub fn issue_transactions_file_check(&mut self, check_size: bool) -> Result<bool> {
        self.files.issued_transactions_file_check(check_size)
    }

    /// One deadline-bounded round of background maintenance
    pub fn housekeeping(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.housekeeping_budget;

        self.files
            .incremental_file_cleanup_check(self.cache.arena_mut(), deadline)?;
        self.incremental_cache_check(deadline)?;
        self.cache
            .incremental_garbage_collection(&mut self.files, deadline)?;
        self.files.issued_transactions_file_check(true)?;
        Ok(())
    }

    pub fn clock(&self) -> &Arc<TimestampProvider> {
        &self.clock
    }
}
