//! Backup handler
//!
//! Keeps a second directory in step with the live storage.
//!
//! ## Lifecycle
//! ```text
//!   new ──► synchronize(channel)* ──► start ──► run loop ──► stop
//!                                               │
//!                      BackupItemQueue ─────────┘ (10s poll)
//! ```
//!
//! Items are replayed idempotently: a range already present in the backup
//! is skipped, a range whose source has since shrunk or vanished is
//! superseded by a later truncate or delete item.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::error::{Result, StoreError};
use crate::file::{
    ChannelFile, DataFileValidator, DirectoryFileProvider, FileKind, FileProvider,
    OperationController, RecordStructureValidator, WriteController,
};

use super::inventory::BackupInventory;
use super::queue::{BackupItem, BackupItemEnqueuer, BackupItemQueue};

/// Longest wait for the next backup item
pub const BACKUP_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Mirrors channel files into a backup directory
pub struct BackupHandler {
    provider: DirectoryFileProvider,
    channels: Vec<Mutex<BackupInventory>>,
    queue: BackupItemQueue,
    validator: Arc<dyn DataFileValidator>,
    operation: Arc<OperationController>,
    write_controller: Arc<dyn WriteController>,
    running: AtomicBool,
    active: AtomicBool,
    stop_sender: Sender<()>,
    stop_receiver: Receiver<()>,
}

impl BackupHandler {
    /// Open the backup directory and read what it already holds
    pub fn new(
        backup_dir: impl Into<PathBuf>,
        channel_count: usize,
        operation: Arc<OperationController>,
        write_controller: Arc<dyn WriteController>,
    ) -> Result<Self> {
        let provider = DirectoryFileProvider::new(backup_dir);
        let channels = (0..channel_count)
            .map(|channel| BackupInventory::read(channel, &provider).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;
        let (stop_sender, stop_receiver) = channel::bounded(1);

        Ok(Self {
            provider,
            channels,
            queue: BackupItemQueue::new(),
            validator: Arc::new(RecordStructureValidator),
            operation,
            write_controller,
            running: AtomicBool::new(false),
            active: AtomicBool::new(false),
            stop_sender,
            stop_receiver,
        })
    }

    /// Move deleted backup files here instead of removing them
    pub fn with_deletion_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.provider = self.provider.with_deletion_dir(dir);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn DataFileValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn provider(&self) -> &DirectoryFileProvider {
        &self.provider
    }

    pub fn enqueuer(&self) -> BackupItemEnqueuer {
        self.queue.enqueuer()
    }

    pub fn pending_items(&self) -> usize {
        self.queue.len()
    }

    fn inventory(&self, channel: usize) -> Result<&Mutex<BackupInventory>> {
        self.channels
            .get(channel)
            .ok_or(StoreError::ChannelUnavailable(channel))
    }

    // =========================================================================
    // Startup Synchronization
    // =========================================================================

    /// Bring the backup of one channel in line with its live files
    ///
    /// `sources` are the channel's live data files, ascending by number.
    pub fn synchronize(
        &self,
        channel: usize,
        sources: &[Arc<ChannelFile>],
        transactions: &Arc<ChannelFile>,
    ) -> Result<()> {
        let mut inventory = self.inventory(channel)?.lock();

        if !inventory.has_data_files() {
            // Step 1a: empty backup, copy everything
            for source in sources {
                let target = inventory.counterpart(source, &self.provider)?;
                target.ensure_exists()?;
                self.copy_file_part(source, 0, source.size()?, &target)?;
            }
            info!(channel, files = sources.len(), "copied storage into empty backup");
        } else {
            // Step 1b: compare file by file
            let last_populated = inventory.last_populated_number()?;
            for source in sources {
                let Some(number) = source.number() else {
                    continue;
                };
                self.synchronize_data_file(&mut inventory, source, number, last_populated)?;
            }

            // Step 2: drop backup files that no longer exist in the storage
            let live: Vec<u64> = sources.iter().filter_map(|s| s.number()).collect();
            for number in inventory.data_file_numbers() {
                if !live.contains(&number) {
                    if let Some(stale) = inventory.remove(number) {
                        self.remove_backup_file(&stale)?;
                    }
                }
            }
        }

        // Step 3: the transactions file is recopied whole on any difference
        let target = Arc::clone(inventory.transactions());
        let source_length = transactions.size()?;
        if !target.exists() || target.size()? != source_length {
            if target.exists() {
                self.discard_transactions_copy(&target)?;
            }
            target.ensure_exists()?;
            self.copy_file_part(transactions, 0, source_length, &target)?;
            debug!(channel, length = source_length, "recopied transactions file");
        }
        Ok(())
    }

    fn synchronize_data_file(
        &self,
        inventory: &mut BackupInventory,
        source: &Arc<ChannelFile>,
        number: u64,
        last_populated: Option<u64>,
    ) -> Result<()> {
        let source_length = source.size()?;

        let Some(target) = inventory.data_file(number).cloned() else {
            let target = inventory.counterpart(source, &self.provider)?;
            target.ensure_exists()?;
            self.copy_file_part(source, 0, source_length, &target)?;
            debug!(channel = source.channel(), number, length = source_length, "copied missing backup file");
            return Ok(());
        };

        let backup_length = target.size()?;
        if backup_length == source_length {
            return Ok(());
        }

        let healable = backup_length < source_length
            && match last_populated {
                Some(last) => number == last || (number > last && backup_length == 0),
                None => backup_length == 0,
            };
        if !healable {
            return Err(StoreError::consistency(format!(
                "backup file {} has length {} but source {} has length {}",
                target.path().display(),
                backup_length,
                source.path().display(),
                source_length
            )));
        }

        self.copy_file_part(source, backup_length, source_length - backup_length, &target)?;
        info!(
            channel = source.channel(),
            number,
            healed = source_length - backup_length,
            "healed backup file"
        );
        Ok(())
    }

    // =========================================================================
    // File Operations
    // =========================================================================

    /// Append `[position, position + length)` of `source` to `target`
    ///
    /// The copied range is verified by checksum and, for data files, by
    /// record structure. Failures close the target and carry the full range.
    pub fn copy_file_part(
        &self,
        source: &ChannelFile,
        position: u64,
        length: u64,
        target: &ChannelFile,
    ) -> Result<()> {
        let result = self.copy_and_verify(source, position, length, target);
        result.map_err(|cause| {
            if let Err(close_error) = target.close() {
                warn!(file = %target.path().display(), error = %close_error, "closing backup file failed");
            }
            StoreError::BackupCopying {
                source_file: source.path().to_path_buf(),
                position,
                length,
                target_file: target.path().to_path_buf(),
                cause: Box::new(cause),
            }
        })
    }

    fn copy_and_verify(
        &self,
        source: &ChannelFile,
        position: u64,
        length: u64,
        target: &ChannelFile,
    ) -> Result<()> {
        let target_position = target.size()?;
        if target_position != position {
            return Err(StoreError::consistency(format!(
                "backup file is at {} but the copy starts at {}",
                target_position, position
            )));
        }
        if length == 0 {
            return Ok(());
        }

        let copied = source.copy_range_to(position, length, target)?;
        if copied != length {
            return Err(StoreError::consistency(format!(
                "copied {} of {} bytes",
                copied, length
            )));
        }

        let expected = source.checksum(position, length)?;
        let actual = target.checksum(position, length)?;
        if expected != actual {
            return Err(StoreError::consistency(format!(
                "checksum mismatch {:08x} != {:08x}",
                expected, actual
            )));
        }

        if matches!(target.kind(), FileKind::Data { .. }) {
            let bytes = target.read_range(position, length as usize)?;
            self.validator.validate(&bytes, position)?;
        }
        Ok(())
    }

    /// Delete a backup file, or move it aside when deletion is disabled
    fn remove_backup_file(&self, file: &ChannelFile) -> Result<()> {
        if self.write_controller.is_file_deletion_enabled() {
            file.delete()?;
            debug!(file = %file.path().display(), "deleted backup file");
            return Ok(());
        }
        match self.provider.deletion_target(file.channel(), file.path()) {
            Some(target) => {
                file.move_to(&target)?;
                debug!(file = %file.path().display(), target = %target.display(), "moved backup file aside");
            }
            None => {
                file.close()?;
                debug!(file = %file.path().display(), "file deletion disabled, backup file kept");
            }
        }
        Ok(())
    }

    /// Empty the backup transactions file, keeping the old one aside if asked to
    fn discard_transactions_copy(&self, file: &ChannelFile) -> Result<()> {
        if !self.write_controller.is_file_deletion_enabled() {
            if let Some(target) = self.provider.deletion_target(file.channel(), file.path()) {
                return file.move_to(&target);
            }
        }
        file.truncate(0)
    }

    // =========================================================================
    // Item Replay
    // =========================================================================

    /// Apply one mirrored mutation
    pub fn process_item(&self, item: BackupItem) -> Result<()> {
        match item {
            BackupItem::Copy {
                source,
                position,
                length,
            } => self.replay_copy(&source, position, length),
            BackupItem::Truncate { file, length } => {
                let target = self
                    .inventory(file.channel())?
                    .lock()
                    .counterpart(&file, &self.provider)?;
                if target.size()? > length {
                    target.truncate(length)?;
                    debug!(file = %target.path().display(), length, "truncated backup file");
                }
                Ok(())
            }
            BackupItem::Delete { file } => {
                let removed = match file.kind() {
                    FileKind::Data { number } => self.inventory(file.channel())?.lock().remove(number),
                    FileKind::Transactions => None,
                };
                match removed {
                    Some(target) => self.remove_backup_file(&target),
                    None => Ok(()),
                }
            }
        }
    }

    fn replay_copy(&self, source: &Arc<ChannelFile>, position: u64, length: u64) -> Result<()> {
        let target = self
            .inventory(source.channel())?
            .lock()
            .counterpart(source, &self.provider)?;
        target.ensure_exists()?;

        let end = position + length;
        let backup_length = target.size()?;
        if backup_length >= end {
            return Ok(());
        }
        if !source.exists() || source.size()? < end {
            debug!(file = %source.path().display(), position, length, "backup item superseded");
            return Ok(());
        }
        if backup_length < position {
            return Err(StoreError::consistency(format!(
                "backup file {} has length {} but the next copy starts at {}",
                target.path().display(),
                backup_length,
                position
            )));
        }
        self.copy_file_part(source, backup_length, end - backup_length, &target)
    }

    // =========================================================================
    // Run Loop
    // =========================================================================

    /// Spawn the backup thread
    pub fn start(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(StoreError::Backup("backup handler already running".to_string()));
        }
        let handler = Arc::clone(self);
        thread::Builder::new()
            .name("channelstore-backup".to_string())
            .spawn(move || handler.run())
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                StoreError::Initialization(format!("spawning backup thread: {}", e))
            })
    }

    /// Ask the run loop to finish the queued items and exit
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.stop_sender.try_send(());
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether the run loop is currently executing
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    fn run(&self) {
        self.active.store(true, Ordering::SeqCst);
        info!(dir = %self.provider.base_dir().display(), "backup handler started");

        let receiver = self.queue.receiver();
        while self.is_running() && self.operation.check_processing_enabled() {
            crossbeam::select! {
                recv(receiver) -> item => {
                    if let Ok(item) = item {
                        if !self.handle(item) {
                            break;
                        }
                    }
                }
                recv(self.stop_receiver) -> _ => {}
                default(BACKUP_POLL_INTERVAL) => {}
            }
        }

        // Step 2: whatever the channels mirrored before stopping
        while self.operation.check_processing_enabled() {
            match receiver.try_recv() {
                Ok(item) => {
                    if !self.handle(item) {
                        break;
                    }
                }
                Err(_) => break,
            }
        }

        if let Err(e) = self.close() {
            error!(error = %e, "closing backup files failed");
        }
        self.running.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);
        info!("backup handler stopped");
    }

    fn handle(&self, item: BackupItem) -> bool {
        if !self.write_controller.is_backup_enabled() {
            return true;
        }
        match self.process_item(item) {
            Ok(()) => true,
            Err(e) => {
                self.operation.register_disruption(&e);
                false
            }
        }
    }

    /// Close every open backup file
    pub fn close(&self) -> Result<()> {
        let mut errors = Vec::new();
        for inventory in &self.channels {
            inventory.lock().close_all(&mut errors);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StoreError::BackupClose(errors))
        }
    }
}
