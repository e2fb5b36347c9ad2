//! File Manager
//!
//! Owns one channel's data file ring and transactions log.
//!
//! ## Responsibilities
//! - Two-phase stores: write + log, then commit or roll back
//! - Head file rollover when the head is full
//! - Dissolving: moving live entity runs out of sparse files into the head
//! - Deleting drained files, deferring those still used elsewhere
//! - Recovery: validating file lengths against the transactions log
//! - Transactions log compaction
//!
//! ## Store protocol
//! ```text
//!   store_chunks ──► head file append ──► Store entry ──┬─► commit_write  (length += n)
//!                                                      └─► rollback_write (truncate + Truncation entry)
//! ```
//!
//! Entity bookkeeping lives in the entity cache; operations that move
//! entities borrow its arena.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::cache::{EntityArena, EntityRef};
use crate::clock::TimestampProvider;
use crate::config::FILE_SIZE_CEILING;
use crate::error::{Result, StoreError};
use crate::transactions::{TransactionEntry, TransactionsAnalysis, TransactionsFileCleaner};

use super::channel_file::{ChannelFile, FileKind};
use super::controller::WriteController;
use super::data_file::{DataFile, DataFileRing, FileRef};
use super::evaluator::DataFileEvaluator;
use super::inventory::StorageInventory;
use super::provider::FileProvider;
use super::writer::FileWriter;

/// Sizes of one data file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStatistics {
    pub number: u64,
    pub path: PathBuf,
    pub data_length: u64,
    pub total_length: u64,
}

/// Sizes of one channel's data files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelStatistics {
    pub channel_index: usize,
    pub file_count: usize,
    pub live_data_length: u64,
    pub total_data_length: u64,
    pub files: Vec<FileStatistics>,
}

/// Per-channel file lifecycle
pub struct FileManager {
    channel: usize,
    ring: DataFileRing,
    transactions: Arc<ChannelFile>,

    writer: Box<dyn FileWriter>,
    provider: Arc<dyn FileProvider>,
    evaluator: Arc<dyn DataFileEvaluator>,
    write_controller: Arc<dyn WriteController>,
    clock: Arc<TimestampProvider>,

    /// Bytes written by the current store, not yet committed
    uncommitted_length: u64,

    /// Timestamp of the last logged store, carried into compacted logs
    last_store_timestamp: u64,

    /// Next file to evaluate for dissolving, `None` once past the head
    cleanup_cursor: Option<FileRef>,

    /// Drained files waiting for their users to finish
    pending_deletes: Vec<DataFile>,

    entry_buffer: Vec<u8>,
}

impl FileManager {
    pub fn new(
        channel: usize,
        provider: Arc<dyn FileProvider>,
        writer: Box<dyn FileWriter>,
        evaluator: Arc<dyn DataFileEvaluator>,
        write_controller: Arc<dyn WriteController>,
        clock: Arc<TimestampProvider>,
    ) -> Self {
        let transactions = Arc::new(ChannelFile::new(
            channel,
            FileKind::Transactions,
            provider.transactions_file(channel),
        ));
        Self {
            channel,
            ring: DataFileRing::new(),
            transactions,
            writer,
            provider,
            evaluator,
            write_controller,
            clock,
            uncommitted_length: 0,
            last_store_timestamp: 0,
            cleanup_cursor: None,
            pending_deletes: Vec::new(),
            entry_buffer: Vec::with_capacity(64),
        }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn transactions_file(&self) -> &Arc<ChannelFile> {
        &self.transactions
    }

    pub(crate) fn ring(&self) -> &DataFileRing {
        &self.ring
    }

    pub fn head_file(&self) -> Result<&DataFile> {
        self.ring.get(self.head_ref()?)
    }

    /// Live data files from oldest to head
    pub fn storage_files(&self) -> Vec<Arc<ChannelFile>> {
        self.ring.iter().map(|(_, f)| Arc::clone(&f.file)).collect()
    }

    /// Visit every live data file from oldest to head
    pub fn iterate_storage_files(&self, mut visitor: impl FnMut(&DataFile)) {
        for (_, file) in self.ring.iter() {
            visitor(file);
        }
    }

    pub fn pending_delete_count(&self) -> usize {
        self.pending_deletes.len()
    }

    pub fn raw_file_statistics(&self) -> ChannelStatistics {
        let files: Vec<FileStatistics> = self
            .ring
            .iter()
            .map(|(_, f)| FileStatistics {
                number: f.number,
                path: f.file.path().to_path_buf(),
                data_length: f.data_length,
                total_length: f.total_length,
            })
            .collect();

        ChannelStatistics {
            channel_index: self.channel,
            file_count: files.len(),
            live_data_length: files.iter().map(|f| f.data_length).sum(),
            total_data_length: files.iter().map(|f| f.total_length).sum(),
            files,
        }
    }

    fn head_ref(&self) -> Result<FileRef> {
        self.ring.head().ok_or_else(|| {
            StoreError::Initialization(format!("channel {} has no head file", self.channel))
        })
    }

    fn write_entry(&mut self, entry: TransactionEntry) -> Result<()> {
        self.entry_buffer.clear();
        entry.encode_into(&mut self.entry_buffer);
        let written = self
            .writer
            .write_transactions(&self.transactions, &self.entry_buffer)?;
        if written != self.entry_buffer.len() as u64 {
            return Err(StoreError::consistency(format!(
                "channel {}: wrote {} of {} transactions entry bytes",
                self.channel,
                written,
                self.entry_buffer.len()
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Store
    // =========================================================================

    /// Append `chunks` to the head file and log the store
    ///
    /// Returns the start position of every chunk. The store stays
    /// uncommitted until `commit_write` or `rollback_write`. Without
    /// chunks only the Store entry is logged, so every channel's log
    /// carries every store timestamp.
    pub fn store_chunks(&mut self, timestamp: u64, chunks: &[Bytes]) -> Result<Vec<u64>> {
        self.write_controller.validate_is_writable()?;
        if chunks.is_empty() {
            let file_length = self.head_file()?.total_length;
            self.write_entry(TransactionEntry::Store {
                timestamp,
                file_length,
            })?;
            self.last_store_timestamp = timestamp;
            return Ok(Vec::new());
        }

        self.check_for_new_file()?;
        let head = self.head_file()?;
        let file = Arc::clone(&head.file);
        let old_length = head.total_length;
        let number = head.number;

        // Step 1: the head must be exactly as long as we believe
        let physical = file.size()?;
        if physical != old_length {
            return Err(StoreError::consistency(format!(
                "channel {}: head file {} has length {} but {} is expected",
                self.channel, number, physical, old_length
            )));
        }

        // Step 2: contiguous positions
        let mut positions = Vec::with_capacity(chunks.len());
        let mut end = old_length;
        for chunk in chunks {
            positions.push(end);
            end += chunk.len() as u64;
        }
        if end > FILE_SIZE_CEILING {
            return Err(StoreError::consistency(format!(
                "channel {}: store would grow file {} to {} bytes",
                self.channel, number, end
            )));
        }
        let expected = end - old_length;

        // Step 3: physical write
        let written = self.writer.write_store(&file, chunks)?;
        let new_physical = file.size()?;
        if written != expected || new_physical != end {
            return Err(StoreError::consistency(format!(
                "channel {}: impossible store length for file {}: wrote {} of {}, file length {}",
                self.channel, number, written, expected, new_physical
            )));
        }

        // Step 4 + 5: remember, then log
        self.uncommitted_length = expected;
        self.write_entry(TransactionEntry::Store {
            timestamp,
            file_length: end,
        })?;
        self.last_store_timestamp = timestamp;

        self.restart_file_cleanup_cursor();
        Ok(positions)
    }

    /// Make the last store part of the head file's logical length
    pub fn commit_write(&mut self) -> Result<()> {
        let length = std::mem::take(&mut self.uncommitted_length);
        if length == 0 {
            return Ok(());
        }
        let head_ref = self.head_ref()?;
        let head = self.ring.get_mut(head_ref)?;
        let position = head.total_length;
        head.total_length += length;
        let file = Arc::clone(&head.file);
        self.writer.commit_store(&file, position, length)
    }

    /// Cut the head file back to its committed length
    pub fn rollback_write(&mut self) -> Result<()> {
        self.uncommitted_length = 0;
        let head = self.head_file()?;
        let file = Arc::clone(&head.file);
        let (number, length) = (head.number, head.total_length);

        let physical = file.size()?;
        if physical == length {
            return Ok(());
        }

        warn!(
            channel = self.channel,
            file = number,
            from = physical,
            to = length,
            "rolling back store"
        );
        self.writer.truncate(&file, length)?;
        self.write_entry(TransactionEntry::FileTruncation {
            timestamp: self.clock.next(),
            file_length: length,
            file_number: number,
            old_length: physical,
        })
    }

    pub fn uncommitted_length(&self) -> u64 {
        self.uncommitted_length
    }

    /// True between a store with content and its commit or rollback
    pub fn has_uncommitted_store(&self) -> bool {
        self.uncommitted_length != 0
    }

    // =========================================================================
    // Head File Rollover
    // =========================================================================

    /// Replace the head file if it is due for retirement
    pub fn check_for_new_file(&mut self) -> Result<bool> {
        let head = self.head_file()?;
        if self.evaluator.needs_retirement(head.total_length) {
            self.create_new_storage_file()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Create the next numbered data file and make it head
    pub fn create_new_storage_file(&mut self) -> Result<FileRef> {
        if self.has_uncommitted_store() {
            return Err(StoreError::consistency(format!(
                "channel {}: head file rollover while a store is uncommitted",
                self.channel
            )));
        }
        let number = match self.ring.head() {
            Some(head) => self.ring.get(head)?.number + 1,
            None => 1,
        };
        let file = Arc::new(ChannelFile::new(
            self.channel,
            FileKind::Data { number },
            self.provider.data_file(self.channel, number),
        ));
        let existing = file.size()?;
        if existing != 0 {
            return Err(StoreError::consistency(format!(
                "channel {}: new data file {} already holds {} bytes",
                self.channel, number, existing
            )));
        }

        let timestamp = self.clock.next();
        self.write_entry(TransactionEntry::FileCreation {
            timestamp,
            file_length: 0,
            file_number: number,
        })?;
        self.writer.create(&file)?;
        let created = self.ring.push_head(number, file, timestamp, 0)?;

        info!(channel = self.channel, file = number, "created data file");
        Ok(created)
    }

    // =========================================================================
    // Entity Placement
    // =========================================================================

    pub(crate) fn append_to_head(&mut self, arena: &mut EntityArena, entity: EntityRef) -> Result<()> {
        let head = self.head_ref()?;
        self.ring.get_mut(head)?.append_entity(head, arena, entity);
        Ok(())
    }

    pub(crate) fn prepend_entity(
        &mut self,
        file: FileRef,
        arena: &mut EntityArena,
        entity: EntityRef,
    ) -> Result<()> {
        self.ring.get_mut(file)?.prepend_entity(file, arena, entity);
        Ok(())
    }

    /// Unlink `entity` from its file, if it has one
    pub(crate) fn detach_entity(&mut self, arena: &mut EntityArena, entity: EntityRef) -> Result<()> {
        if let Some(file) = arena[entity].file {
            self.ring.get_mut(file)?.remove_entity(arena, entity);
        }
        Ok(())
    }

    /// Read `length` bytes of `file` at `position`
    pub(crate) fn read_entity(&self, file: FileRef, position: u64, length: usize) -> Result<Vec<u8>> {
        self.ring.get(file)?.file.read_range(position, length)
    }

    // =========================================================================
    // Dissolving
    // =========================================================================

    /// Evaluate files from the oldest one again
    pub fn restart_file_cleanup_cursor(&mut self) {
        self.cleanup_cursor = self.ring.oldest();
    }

    /// Dissolve and delete files until the cursor passes the head or the deadline hits
    ///
    /// Returns true when the pass completed with no deletion left pending.
    /// Nothing moves while a store is uncommitted.
    pub fn incremental_file_cleanup_check(
        &mut self,
        arena: &mut EntityArena,
        deadline: Instant,
    ) -> Result<bool> {
        if !self.write_controller.is_file_cleanup_enabled() {
            return Ok(true);
        }
        if self.has_uncommitted_store() {
            debug!(channel = self.channel, "file cleanup deferred until the store commits");
            return Ok(false);
        }
        self.process_pending_deletes()?;

        while let Some(cursor) = self.cleanup_cursor {
            if Instant::now() >= deadline {
                return Ok(false);
            }

            let head = self.head_ref()?;
            let view = self.ring.get(cursor)?.view(cursor == head);
            if !self.evaluator.needs_dissolving(&view) {
                self.cleanup_cursor = if cursor == head {
                    None
                } else {
                    Some(self.ring.next_of(cursor)?)
                };
                continue;
            }

            if cursor == head {
                self.create_new_storage_file()?;
            }
            if !self.dissolve_file(arena, cursor, deadline)? {
                return Ok(false);
            }

            self.cleanup_cursor = Some(self.ring.next_of(cursor)?);
            self.delete_file(cursor)?;
        }

        Ok(self.pending_deletes.is_empty())
    }

    /// Full cleanup pass from the oldest file
    pub fn issued_file_cleanup_check(
        &mut self,
        arena: &mut EntityArena,
        deadline: Instant,
    ) -> Result<bool> {
        self.restart_file_cleanup_cursor();
        self.incremental_file_cleanup_check(arena, deadline)
    }

    fn dissolve_file(&mut self, arena: &mut EntityArena, file: FileRef, deadline: Instant) -> Result<bool> {
        debug!(
            channel = self.channel,
            file = self.ring.get(file)?.number,
            "dissolving data file"
        );
        while self.ring.get(file)?.has_content() {
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.transfer_one_chain_to_head_file(arena, file)?;
        }
        Ok(true)
    }

    /// Copy the leading contiguous entity run of `source` to the head file
    fn transfer_one_chain_to_head_file(&mut self, arena: &mut EntityArena, source: FileRef) -> Result<()> {
        let head_ref = self.head_ref()?;
        let head_length = self.ring.get(head_ref)?.total_length;
        let free = self.evaluator.file_maximum_size().saturating_sub(head_length);

        let (source_number, source_file, first) = {
            let file = self.ring.get(source)?;
            let first = file.first.ok_or_else(|| {
                StoreError::consistency(format!("file {} has no entities to transfer", file.number))
            })?;
            (file.number, Arc::clone(&file.file), first)
        };

        let start = arena[first].storage_position as u64;
        let first_length = arena[first].length as u64;
        if first_length > free && head_length > 0 {
            self.create_new_storage_file()?;
            return Ok(());
        }

        // Step 1: longest contiguous run that fits
        let mut last = first;
        let mut end = start + first_length;
        while let Some(next) = arena[last].file_next {
            let entity = &arena[next];
            let next_end = end + entity.length as u64;
            if entity.storage_position as u64 != end || next_end - start > free {
                break;
            }
            last = next;
            end = next_end;
        }
        let copy_length = end - start;

        // Step 2: physical copy
        let head_file = Arc::clone(&self.ring.get(head_ref)?.file);
        let written = self
            .writer
            .write_transfer(&source_file, start, copy_length, &head_file)?;
        if written != copy_length {
            return Err(StoreError::consistency(format!(
                "channel {}: transferred {} of {} bytes from file {}",
                self.channel, written, copy_length, source_number
            )));
        }

        // Step 3: relink and reposition
        let mut cursor = Some(first);
        while let Some(entity) = cursor {
            let slot = &mut arena[entity];
            slot.storage_position = (head_length + (slot.storage_position as u64 - start)) as u32;
            cursor = if entity == last { None } else { slot.file_next };
        }
        self.ring
            .get_mut(source)?
            .remove_head_bound_chain(arena, last, copy_length)?;
        self.ring
            .get_mut(head_ref)?
            .add_chain_to_tail(head_ref, arena, first, last, copy_length);

        let head = self.ring.get_mut(head_ref)?;
        head.total_length += copy_length;
        let new_length = head.total_length;

        // Step 4: log
        self.write_entry(TransactionEntry::Transfer {
            timestamp: self.clock.next(),
            file_length: new_length,
            source_file_number: source_number,
            source_offset: start,
        })?;

        debug!(
            channel = self.channel,
            from = source_number,
            offset = start,
            length = copy_length,
            "transferred entity chain"
        );

        if copy_length >= free {
            self.create_new_storage_file()?;
        }
        Ok(())
    }

    // =========================================================================
    // Deletion
    // =========================================================================

    fn delete_file(&mut self, file: FileRef) -> Result<()> {
        let detached = self.ring.detach(file)?;
        if detached.has_users() || !self.write_controller.is_file_deletion_enabled() {
            debug!(
                channel = self.channel,
                file = detached.number,
                "data file deletion pending"
            );
            self.pending_deletes.push(detached);
            return Ok(());
        }
        self.delete_detached(detached)
    }

    fn process_pending_deletes(&mut self) -> Result<()> {
        if self.pending_deletes.is_empty() || !self.write_controller.is_file_deletion_enabled() {
            return Ok(());
        }
        for file in std::mem::take(&mut self.pending_deletes) {
            if file.has_users() {
                self.pending_deletes.push(file);
            } else {
                self.delete_detached(file)?;
            }
        }
        Ok(())
    }

    fn delete_detached(&mut self, file: DataFile) -> Result<()> {
        // logged first so recovery never meets an unexplained missing file
        self.write_entry(TransactionEntry::FileDeletion {
            timestamp: self.clock.next(),
            file_length: file.total_length,
            file_number: file.number,
        })?;
        let target = self.provider.deletion_target(self.channel, file.file.path());
        self.writer.delete(&file.file, target.as_deref())?;
        info!(channel = self.channel, file = file.number, "deleted data file");
        Ok(())
    }

    // =========================================================================
    // Transactions Log Compaction
    // =========================================================================

    /// Rewrite the transactions log to its minimal form
    ///
    /// With `check_size` the rewrite only happens above the configured size.
    pub fn issued_transactions_file_check(&mut self, check_size: bool) -> Result<bool> {
        if check_size
            && self.transactions.size()? <= self.evaluator.transaction_file_maximum_size()
        {
            return Ok(false);
        }
        if !self.pending_deletes.is_empty() || self.has_uncommitted_store() {
            // pending files and uncommitted bytes are not settled in the current log
            debug!(channel = self.channel, "transactions log compaction deferred");
            return Ok(false);
        }

        let mut cleaner = TransactionsFileCleaner::new();
        for (_, file) in self.ring.iter() {
            cleaner.add_file(file.number, file.created_at, file.total_length)?;
        }
        if self.last_store_timestamp > 0 {
            cleaner.add_store(self.last_store_timestamp)?;
        }
        let file_count = cleaner.file_count();
        let bytes = cleaner.finish();

        let old_size = self.transactions.size()?;
        let scratch = self.provider.transactions_scratch_file(self.channel);
        self.writer
            .replace_transactions(&self.transactions, &scratch, &bytes)?;

        info!(
            channel = self.channel,
            files = file_count,
            from = old_size,
            to = bytes.len(),
            "compacted transactions log"
        );
        Ok(true)
    }

    // =========================================================================
    // Export
    // =========================================================================

    /// Copy every live data file and the transactions log into `target`
    pub fn export_files(&self, target: &dyn FileProvider) -> Result<()> {
        for (_, file) in self.ring.iter() {
            let copy = ChannelFile::new(
                self.channel,
                FileKind::Data {
                    number: file.number,
                },
                target.data_file(self.channel, file.number),
            );
            copy_whole(&file.file, file.total_length, &copy)?;
        }

        let log = ChannelFile::new(
            self.channel,
            FileKind::Transactions,
            target.transactions_file(self.channel),
        );
        copy_whole(&self.transactions, self.transactions.size()?, &log)?;

        info!(channel = self.channel, files = self.ring.len(), "exported channel files");
        Ok(())
    }

    // =========================================================================
    // Recovery
    // =========================================================================

    /// Rebuild the file ring from what is on disk
    ///
    /// Entities are registered separately by the entity cache afterwards.
    /// A head file store logged after `consistent_store_timestamp` did not
    /// reach every channel and is cut off; `None` trusts the latest store.
    pub fn initialize(
        &mut self,
        inventory: StorageInventory,
        consistent_store_timestamp: Option<u64>,
    ) -> Result<()> {
        let (mut data_files, transactions, analysis) = inventory.into_parts();
        self.ring.clear();
        self.pending_deletes.clear();
        self.uncommitted_length = 0;
        self.last_store_timestamp = 0;
        self.transactions = transactions;

        let analysis = match analysis {
            Some(analysis) => {
                self.truncate_torn_tail(&analysis)?;
                self.clock.advance_to(analysis.max_timestamp);
                Some(analysis).filter(|a| !a.is_empty())
            }
            None => None,
        };

        match analysis {
            Some(analysis) => {
                self.last_store_timestamp = analysis.head_file_latest_timestamp;
                self.recover_logged_files(&analysis, &mut data_files, consistent_store_timestamp)?
            }
            None if data_files.is_empty() => {
                self.writer.create(&self.transactions)?;
                info!(channel = self.channel, "initializing empty channel");
            }
            None => self.derive_unlogged_files(&mut data_files)?,
        }
        self.supplement_undocumented_files(data_files)?;

        if self.ring.is_empty() {
            self.create_new_storage_file()?;
        }
        self.restart_file_cleanup_cursor();

        info!(
            channel = self.channel,
            files = self.ring.len(),
            "recovered data files"
        );
        Ok(())
    }

    fn truncate_torn_tail(&mut self, analysis: &TransactionsAnalysis) -> Result<()> {
        let size = self.transactions.size()?;
        if analysis.consumed_length < size {
            warn!(
                channel = self.channel,
                complete = analysis.consumed_length,
                size,
                "truncating incomplete transactions log tail"
            );
            self.writer
                .truncate(&self.transactions, analysis.consumed_length)?;
        }
        Ok(())
    }

    fn recover_logged_files(
        &mut self,
        analysis: &TransactionsAnalysis,
        data_files: &mut BTreeMap<u64, Arc<ChannelFile>>,
        consistent_store_timestamp: Option<u64>,
    ) -> Result<()> {
        let confirmed = consistent_store_timestamp
            .map_or(true, |consistent| analysis.head_file_latest_timestamp <= consistent);
        if !confirmed
            && analysis.head_file_latest_length > analysis.head_file_last_consistent_store_length
        {
            warn!(
                channel = self.channel,
                store = analysis.head_file_latest_timestamp,
                "discarding store that did not reach every channel"
            );
        }

        for logged in analysis.files.values() {
            let found = data_files.remove(&logged.number);

            if logged.deleted {
                if let Some(file) = found {
                    info!(
                        channel = self.channel,
                        file = logged.number,
                        "removing leftover of deleted data file"
                    );
                    let target = self.provider.deletion_target(self.channel, file.path());
                    self.writer.delete(&file, target.as_deref())?;
                }
                continue;
            }

            let file = found.unwrap_or_else(|| {
                Arc::new(ChannelFile::new(
                    self.channel,
                    FileKind::Data {
                        number: logged.number,
                    },
                    self.provider.data_file(self.channel, logged.number),
                ))
            });
            let physical = file.size()?;
            let is_last = analysis.head_file_number == Some(logged.number);

            let length = if is_last {
                resolve_head_length(analysis, physical, confirmed)?
            } else {
                if physical != logged.length {
                    return Err(StoreError::consistency(format!(
                        "channel {}: data file {} has length {} but the log requires {}",
                        self.channel, logged.number, physical, logged.length
                    )));
                }
                logged.length
            };

            if !file.exists() {
                warn!(
                    channel = self.channel,
                    file = logged.number,
                    "recreating missing empty data file"
                );
                self.writer.create(&file)?;
            }

            if physical > length {
                warn!(
                    channel = self.channel,
                    file = logged.number,
                    from = physical,
                    to = length,
                    "truncating unconfirmed head file content"
                );
                self.write_entry(TransactionEntry::FileTruncation {
                    timestamp: self.clock.next(),
                    file_length: length,
                    file_number: logged.number,
                    old_length: physical,
                })?;
                self.writer.truncate(&file, length)?;
            }

            self.ring
                .push_head(logged.number, file, logged.created_at, length)?;
        }
        Ok(())
    }

    /// Log files found without any transactions log
    fn derive_unlogged_files(&mut self, data_files: &mut BTreeMap<u64, Arc<ChannelFile>>) -> Result<()> {
        warn!(
            channel = self.channel,
            files = data_files.len(),
            "no transactions log, deriving entries from data files"
        );
        for (number, file) in std::mem::take(data_files) {
            let length = file.size()?;
            let created_at = self.clock.next();
            self.write_entry(TransactionEntry::FileCreation {
                timestamp: created_at,
                file_length: 0,
                file_number: number,
            })?;
            if length > 0 {
                self.write_entry(TransactionEntry::Transfer {
                    timestamp: self.clock.next(),
                    file_length: length,
                    source_file_number: number,
                    source_offset: 0,
                })?;
            }
            self.ring.push_head(number, file, created_at, length)?;
        }

        if let Some(head) = self.ring.head() {
            let file_length = self.ring.get(head)?.total_length;
            let timestamp = self.clock.next();
            self.write_entry(TransactionEntry::Store {
                timestamp,
                file_length,
            })?;
            self.last_store_timestamp = timestamp;
        }
        Ok(())
    }

    /// Handle data files the log does not mention
    fn supplement_undocumented_files(&mut self, data_files: BTreeMap<u64, Arc<ChannelFile>>) -> Result<()> {
        for (number, file) in data_files {
            let length = file.size()?;
            if length != 0 {
                return Err(StoreError::consistency(format!(
                    "channel {}: data file {} with {} bytes is not documented in the transactions log",
                    self.channel, number, length
                )));
            }

            let head_number = match self.ring.head() {
                Some(head) => self.ring.get(head)?.number,
                None => 0,
            };
            if number > head_number {
                let created_at = self.clock.next();
                self.write_entry(TransactionEntry::FileCreation {
                    timestamp: created_at,
                    file_length: 0,
                    file_number: number,
                })?;
                self.ring.push_head(number, file, created_at, 0)?;
                info!(channel = self.channel, file = number, "supplemented empty data file");
            } else {
                warn!(channel = self.channel, file = number, "removing empty undocumented data file");
                self.writer.delete(&file, None)?;
            }
        }
        Ok(())
    }
}

/// Recovered length of the last logged file given its physical length
///
/// An unconfirmed latest store falls back to the last consistent length.
fn resolve_head_length(analysis: &TransactionsAnalysis, physical: u64, confirmed: bool) -> Result<u64> {
    if confirmed && physical >= analysis.head_file_latest_length {
        Ok(analysis.head_file_latest_length)
    } else if physical >= analysis.head_file_last_consistent_store_length {
        Ok(analysis.head_file_last_consistent_store_length)
    } else {
        Err(StoreError::consistency(format!(
            "head file is {} bytes long, shorter than its last consistent length {}",
            physical, analysis.head_file_last_consistent_store_length
        )))
    }
}

fn copy_whole(source: &ChannelFile, length: u64, target: &ChannelFile) -> Result<()> {
    if target.exists() {
        target.truncate(0)?;
    } else {
        target.ensure_exists()?;
    }
    source.copy_range_to(0, length, target)?;
    target.close()
}
