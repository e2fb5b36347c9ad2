//! Engine Module
//!
//! The storage system: one thread per channel plus the backup thread.
//!
//! ## Responsibilities
//! - Startup: inventories, recovery, entity registration, backup sync
//! - Routing records and requests to the owning channel
//! - Two-phase stores across channels
//! - Housekeeping between tasks on every channel thread
//! - Orderly shutdown
//!
//! ## Concurrency Model: one thread per channel
//!
//! ```text
//!   Engine ──► broker[0] ──► channel thread 0 ── StorageChannel (cache + files)
//!          ──► broker[1] ──► channel thread 1 ── StorageChannel
//!          ...                     │
//!                          MarkMonitor (shared)      BackupMirroringWriter
//!                                                          │
//!                                                   backup thread ── BackupHandler
//! ```
//!
//! A channel's entities and files are only ever touched by its thread.
//! Requests travel as closures over a crossbeam channel and reply through a
//! one-shot channel. Housekeeping runs whenever the interval elapsed, either
//! idle or between tasks.

use std::fs;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::backup::BackupHandler;
use crate::cache::{EntityCache, EntityCacheEvaluator, TypeDictionary};
use crate::channel::{EntityLocation, StorageChannel};
use crate::clock::TimestampProvider;
use crate::config::StorageConfig;
use crate::error::{Result, StoreError};
use crate::file::{
    index_records, BackupMirroringWriter, ChannelStatistics, DefaultDataFileEvaluator,
    DirectFileWriter, DirectoryFileProvider, FileManager, FileProvider, FileWriter,
    OperationController, RecordSlot, StorageInventory, SwitchableWriteController,
    WriteController,
};
use crate::gc::{LiveObjectIdChecker, MarkMonitor, MarkMonitorStatus, ZombieOidHandler};

type ChannelTask = Box<dyn FnOnce(&mut StorageChannel) + Send>;

type PrepareFn = fn(&mut StorageChannel, u64, &[Bytes]) -> Result<Vec<u64>>;

enum ChannelMessage {
    Task(ChannelTask),
    Shutdown,
}

// =============================================================================
// Builder
// =============================================================================

/// Optional collaborators for `Engine::open`
pub struct EngineBuilder {
    config: StorageConfig,
    types: Arc<dyn TypeDictionary>,
    write_controller: Option<Arc<dyn WriteController>>,
    cache_evaluator: Option<Arc<dyn EntityCacheEvaluator>>,
    live_checker: Option<Arc<dyn LiveObjectIdChecker>>,
    zombie_handler: Option<Arc<dyn ZombieOidHandler>>,
}

impl EngineBuilder {
    pub fn write_controller(mut self, controller: Arc<dyn WriteController>) -> Self {
        self.write_controller = Some(controller);
        self
    }

    pub fn cache_evaluator(mut self, evaluator: Arc<dyn EntityCacheEvaluator>) -> Self {
        self.cache_evaluator = Some(evaluator);
        self
    }

    pub fn live_checker(mut self, checker: Arc<dyn LiveObjectIdChecker>) -> Self {
        self.live_checker = Some(checker);
        self
    }

    pub fn zombie_handler(mut self, handler: Arc<dyn ZombieOidHandler>) -> Self {
        self.zombie_handler = Some(handler);
        self
    }

    pub fn open(self) -> Result<Engine> {
        Engine::start(self)
    }
}

// =============================================================================
// Engine
// =============================================================================

/// The running storage system
pub struct Engine {
    config: StorageConfig,
    brokers: Vec<Sender<ChannelMessage>>,
    channel_threads: Mutex<Vec<JoinHandle<()>>>,
    backup: Option<Arc<BackupHandler>>,
    backup_thread: Mutex<Option<JoinHandle<()>>>,
    monitor: Arc<MarkMonitor>,
    clock: Arc<TimestampProvider>,
    operation: Arc<OperationController>,
    write_controller: Arc<dyn WriteController>,
    /// Held from prepare to commit; one two-phase store at a time
    store_lock: Mutex<()>,
}

impl Engine {
    pub fn builder(config: StorageConfig, types: Arc<dyn TypeDictionary>) -> EngineBuilder {
        EngineBuilder {
            config,
            types,
            write_controller: None,
            cache_evaluator: None,
            live_checker: None,
            zombie_handler: None,
        }
    }

    /// Open or create a storage with default collaborators
    pub fn open(config: StorageConfig, types: Arc<dyn TypeDictionary>) -> Result<Self> {
        Self::builder(config, types).open()
    }

    /// On startup:
    /// 1. Validate the configuration
    /// 2. Read every channel's inventory and recover its files and entities
    /// 3. Synchronize the backup
    /// 4. Start the channel threads and the backup thread
    ///
    /// Any failure aborts startup.
    fn start(builder: EngineBuilder) -> Result<Self> {
        let EngineBuilder {
            config,
            types,
            write_controller,
            cache_evaluator,
            live_checker,
            zombie_handler,
        } = builder;

        // Step 1: Configuration and shared state
        config.validate()?;
        fs::create_dir_all(&config.base_dir)
            .map_err(|e| StoreError::writing(&config.base_dir, e))?;

        let operation = Arc::new(OperationController::new());
        let write_controller: Arc<dyn WriteController> =
            write_controller.unwrap_or_else(|| Arc::new(SwitchableWriteController::new()));
        let monitor = Arc::new(MarkMonitor::new(config.channel_count));
        let clock = Arc::new(TimestampProvider::new());

        let backup = match &config.backup_dir {
            Some(dir) => {
                let mut handler = BackupHandler::new(
                    dir,
                    config.channel_count,
                    Arc::clone(&operation),
                    Arc::clone(&write_controller),
                )?;
                if let Some(deletion_dir) = &config.deletion_dir {
                    handler = handler.with_deletion_dir(deletion_dir.join("backup"));
                }
                Some(Arc::new(handler))
            }
            None => None,
        };

        let mut provider = DirectoryFileProvider::new(&config.base_dir);
        if let Some(dir) = &config.deletion_dir {
            provider = provider.with_deletion_dir(dir);
        }
        let provider: Arc<dyn FileProvider> = Arc::new(provider);
        let evaluator = Arc::new(DefaultDataFileEvaluator::new(&config));

        // Step 2: Recovery, channel by channel, up to the last store every
        // channel logged
        let inventories = (0..config.channel_count)
            .map(|index| StorageInventory::read(index, &*provider))
            .collect::<Result<Vec<_>>>()?;
        let consistent_store_timestamp = consistent_store_timestamp(&inventories);
        if let Some(timestamp) = consistent_store_timestamp {
            debug!(timestamp, "consistent store timestamp");
        }

        let mut channels = Vec::with_capacity(config.channel_count);
        for (index, inventory) in inventories.into_iter().enumerate() {
            let writer: Box<dyn FileWriter> = match &backup {
                Some(handler) => Box::new(BackupMirroringWriter::new(
                    DirectFileWriter,
                    handler.enqueuer(),
                )),
                None => Box::new(DirectFileWriter),
            };
            let files = FileManager::new(
                index,
                Arc::clone(&provider),
                writer,
                evaluator.clone(),
                Arc::clone(&write_controller),
                Arc::clone(&clock),
            );

            let mut cache = EntityCache::new(index, &config, Arc::clone(&types), Arc::clone(&monitor));
            if let Some(evaluator) = &cache_evaluator {
                cache = cache.with_cache_evaluator(Arc::clone(evaluator));
            }
            if let Some(checker) = &live_checker {
                cache = cache.with_live_checker(Arc::clone(checker));
            }
            if let Some(handler) = &zombie_handler {
                cache = cache.with_zombie_handler(Arc::clone(handler));
            }

            let mut channel = StorageChannel::new(
                cache,
                files,
                Arc::clone(&monitor),
                Arc::clone(&clock),
                Duration::from_nanos(config.housekeeping_time_budget_ns),
            );
            let entities = channel.initialize(inventory, consistent_store_timestamp)?;
            debug!(channel = index, entities, "channel recovered");
            channels.push(channel);
        }

        // Step 3: Backup synchronization
        if let Some(handler) = &backup {
            for channel in &channels {
                let files = channel.files();
                handler.synchronize(
                    channel.channel(),
                    &files.storage_files(),
                    files.transactions_file(),
                )?;
            }
        }

        // one hot and cold cycle over whatever was recovered
        monitor.reset_completion();

        // Step 4: Threads
        let interval = Duration::from_millis(config.housekeeping_interval_ms);
        let mut brokers = Vec::with_capacity(channels.len());
        let mut channel_threads = Vec::with_capacity(channels.len());
        for channel in channels {
            let (sender, receiver) = channel::unbounded();
            let index = channel.channel();
            let operation = Arc::clone(&operation);
            let handle = thread::Builder::new()
                .name(format!("channelstore-channel-{}", index))
                .spawn(move || run_channel(channel, receiver, operation, interval))
                .map_err(|e| {
                    StoreError::Initialization(format!("spawning channel thread {}: {}", index, e))
                })?;
            brokers.push(sender);
            channel_threads.push(handle);
        }

        let backup_thread = match &backup {
            Some(handler) => Some(handler.start()?),
            None => None,
        };

        info!(
            base_dir = %config.base_dir.display(),
            channels = config.channel_count,
            backup = backup.is_some(),
            "storage started"
        );

        Ok(Self {
            config,
            brokers,
            channel_threads: Mutex::new(channel_threads),
            backup,
            backup_thread: Mutex::new(backup_thread),
            monitor,
            clock,
            operation,
            write_controller,
            store_lock: Mutex::new(()),
        })
    }

    // =========================================================================
    // Task Dispatch
    // =========================================================================

    /// Send `task` to a channel thread without waiting
    fn submit<T, F>(&self, channel: usize, task: F) -> Result<Receiver<Result<T>>>
    where
        T: Send + 'static,
        F: FnOnce(&mut StorageChannel) -> Result<T> + Send + 'static,
    {
        self.operation.validate_processing_enabled()?;
        let broker = self
            .brokers
            .get(channel)
            .ok_or(StoreError::ChannelUnavailable(channel))?;

        let (reply, response) = channel::bounded(1);
        let operation = Arc::clone(&self.operation);
        let task: ChannelTask = Box::new(move |storage: &mut StorageChannel| {
            let result = task(storage);
            if let Err(e) = &result {
                if e.is_fatal() {
                    operation.register_disruption(e);
                }
            }
            let _ = reply.send(result);
        });

        broker
            .send(ChannelMessage::Task(task))
            .map_err(|_| StoreError::ChannelUnavailable(channel))?;
        Ok(response)
    }

    fn await_reply<T>(channel: usize, response: Receiver<Result<T>>) -> Result<T> {
        response
            .recv()
            .map_err(|_| StoreError::ChannelUnavailable(channel))?
    }

    /// Run `task` on one channel and wait for its result
    fn call<T, F>(&self, channel: usize, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut StorageChannel) -> Result<T> + Send + 'static,
    {
        let response = self.submit(channel, task)?;
        Self::await_reply(channel, response)
    }

    /// Run a task on every channel concurrently, results in channel order
    fn broadcast<T, F>(&self, task: F) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(&mut StorageChannel) -> Result<T> + Send + Sync + 'static,
    {
        let task = Arc::new(task);
        let mut responses = Vec::with_capacity(self.brokers.len());
        for channel in 0..self.brokers.len() {
            let task = Arc::clone(&task);
            responses.push(self.submit(channel, move |storage| task(storage))?);
        }

        let mut results = Vec::with_capacity(responses.len());
        let mut first_error = None;
        for (channel, response) in responses.into_iter().enumerate() {
            match Self::await_reply(channel, response) {
                Ok(value) => results.push(value),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// Split record buffers into per-channel record lists
    fn route_records(&self, data: &[Bytes]) -> Result<Vec<Vec<Bytes>>> {
        let mut routed = vec![Vec::new(); self.brokers.len()];
        for buffer in data {
            for slot in index_records(buffer, 0)? {
                if let RecordSlot::Entity { position, header } = slot {
                    let start = position as usize;
                    let end = start + header.length as usize;
                    let channel = self.config.channel_of(header.object_id);
                    routed[channel].push(buffer.slice(start..end));
                }
            }
        }
        Ok(routed)
    }

    // =========================================================================
    // Store / Load
    // =========================================================================

    /// Store entity records, all or nothing across channels
    ///
    /// Every buffer holds one or more complete records. Returns the store
    /// timestamp.
    pub fn store(&self, data: &[Bytes]) -> Result<u64> {
        self.write_controller.validate_is_writable()?;
        let routed = self.route_records(data)?;

        let _serial = self.store_lock.lock();
        let timestamp = self.clock.next();
        self.two_phase_store(timestamp, routed, StorageChannel::prepare_store)?;
        Ok(timestamp)
    }

    /// Write on every channel, then commit everywhere or roll back everywhere
    ///
    /// Channels without records still log the store, so every transactions
    /// log carries every store timestamp. Callers hold `store_lock`.
    fn two_phase_store(
        &self,
        timestamp: u64,
        routed: Vec<Vec<Bytes>>,
        prepare: PrepareFn,
    ) -> Result<usize> {
        // Step 1: every channel writes and logs
        let mut prepared = Vec::with_capacity(routed.len());
        let mut failure = None;
        for (channel, chunks) in routed.iter().enumerate() {
            let chunks = chunks.clone();
            match self.submit(channel, move |storage| prepare(storage, timestamp, &chunks)) {
                Ok(response) => prepared.push((channel, response)),
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let mut written = Vec::with_capacity(prepared.len());
        for (channel, response) in prepared {
            match Self::await_reply(channel, response) {
                Ok(positions) => written.push((channel, positions)),
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }

        // Step 2a: any failure undoes the others
        if let Some(e) = failure.take() {
            self.rollback_channels(written.into_iter().map(|(channel, _)| channel));
            return Err(e);
        }

        // Step 2b: commit everywhere
        let mut commits = Vec::with_capacity(written.len());
        let mut remaining = written.into_iter();
        while let Some((channel, positions)) = remaining.next() {
            let chunks = routed[channel].clone();
            match self.submit(channel, move |storage| storage.commit_store(&chunks, &positions)) {
                Ok(response) => commits.push((channel, response)),
                Err(e) => {
                    // earlier channels may have committed already
                    self.rollback_channels(
                        std::iter::once(channel).chain(remaining.map(|(channel, _)| channel)),
                    );
                    let partial = StoreError::consistency(format!(
                        "store {} committed on some channels only: {}",
                        timestamp, e
                    ));
                    self.operation.register_disruption(&partial);
                    failure = Some(partial);
                    break;
                }
            }
        }

        let mut count = 0;
        for (channel, response) in commits {
            match Self::await_reply(channel, response) {
                Ok(stored) => count += stored,
                Err(e) => {
                    failure.get_or_insert(e);
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Undo prepared stores; an unreachable channel at least stops holding up marking
    fn rollback_channels(&self, channels: impl Iterator<Item = usize>) {
        for channel in channels {
            if let Err(e) = self.call(channel, |storage| storage.rollback_store()) {
                error!(channel, error = %e, "rolling back store failed");
                self.monitor.clear_pending_store_update(channel);
            }
        }
    }

    /// Record bytes of `object_id`, header included
    pub fn load(&self, object_id: u64) -> Result<Option<Bytes>> {
        let channel = self.config.channel_of(object_id);
        self.call(channel, move |storage| storage.load(object_id))
    }

    pub fn entity_location(&self, object_id: u64) -> Result<Option<EntityLocation>> {
        let channel = self.config.channel_of(object_id);
        self.call(channel, move |storage| storage.entity_location(object_id))
    }

    // =========================================================================
    // Issued Housekeeping
    // =========================================================================

    /// Collect garbage on all channels; true if complete within `timeout`
    pub fn issue_garbage_collection(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let operation = Arc::clone(&self.operation);
        let results = self.broadcast(move |storage| {
            let keep_running =
                || operation.check_processing_enabled() && !operation.is_shutdown_requested();
            storage.issue_garbage_collection(deadline, &keep_running)
        })?;
        Ok(results.into_iter().all(|done| done))
    }

    /// Dissolve and delete sparse files; true if every channel finished
    pub fn issue_file_cleanup(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let results = self.broadcast(move |storage| storage.issue_file_cleanup(deadline))?;
        Ok(results.into_iter().all(|done| done))
    }

    /// Full cache evaluation, optionally with an ad hoc evaluator
    pub fn issue_cache_check(
        &self,
        timeout: Duration,
        evaluator: Option<Arc<dyn EntityCacheEvaluator>>,
    ) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let results = self.broadcast(move |storage| {
            storage.issue_cache_check(deadline, evaluator.as_deref())
        })?;
        Ok(results.into_iter().all(|done| done))
    }

    /// Compact transactions logs; without `check_size` unconditionally
    pub fn issue_transactions_file_check(&self, check_size: bool) -> Result<bool> {
        let results =
            self.broadcast(move |storage| storage.issue_transactions_file_check(check_size))?;
        Ok(results.into_iter().any(|compacted| compacted))
    }

    // =========================================================================
    // Import / Export
    // =========================================================================

    /// Copy every channel's live files into `target_dir`
    pub fn export(&self, target_dir: &Path) -> Result<()> {
        let target = Arc::new(DirectoryFileProvider::new(target_dir));
        self.broadcast(move |storage| storage.export_data(&*target))?;
        info!(target = %target_dir.display(), "exported storage");
        Ok(())
    }

    /// Records of one type from every channel, written to `out`
    pub fn export_type(&self, type_id: u64, out: &mut dyn Write) -> Result<u64> {
        let parts = self.broadcast(move |storage| {
            let mut buffer = Vec::new();
            storage.export_type(type_id, &mut buffer)?;
            Ok(buffer)
        })?;
        let mut written = 0u64;
        for part in parts {
            out.write_all(&part)?;
            written += part.len() as u64;
        }
        Ok(written)
    }

    /// Write foreign records into fresh head files, all or nothing
    pub fn import(&self, data: &[Bytes]) -> Result<usize> {
        self.write_controller.validate_is_writable()?;
        let routed = self.route_records(data)?;

        let _serial = self.store_lock.lock();
        let timestamp = self.clock.next();
        let imported = self.two_phase_store(timestamp, routed, StorageChannel::prepare_import)?;
        info!(entities = imported, "imported records");
        Ok(imported)
    }

    // =========================================================================
    // Monitoring
    // =========================================================================

    pub fn statistics(&self) -> Result<Vec<ChannelStatistics>> {
        self.broadcast(|storage| Ok(storage.statistics()))
    }

    /// Object ids of `type_id` across all channels
    pub fn object_ids_of_type(&self, type_id: u64) -> Result<Vec<u64>> {
        let parts = self.broadcast(move |storage| Ok(storage.cache().object_ids_of_type(type_id)))?;
        Ok(parts.into_iter().flatten().collect())
    }

    pub fn gc_status(&self) -> MarkMonitorStatus {
        self.monitor.status()
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn operation_controller(&self) -> &Arc<OperationController> {
        &self.operation
    }

    pub fn backup(&self) -> Option<&Arc<BackupHandler>> {
        self.backup.as_ref()
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Stop all threads; the backup drains its queue first
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) -> Result<()> {
        self.operation.request_shutdown();
        self.monitor.notify_all();

        for broker in &self.brokers {
            let _ = broker.send(ChannelMessage::Shutdown);
        }
        let mut panicked = Vec::new();
        for (index, handle) in self.channel_threads.lock().drain(..).enumerate() {
            if handle.join().is_err() {
                panicked.push(index);
            }
        }

        if let Some(handler) = &self.backup {
            handler.stop();
            if let Some(handle) = self.backup_thread.lock().take() {
                if handle.join().is_err() {
                    error!("backup thread panicked");
                }
            }
        }

        if !panicked.is_empty() {
            return Err(StoreError::Initialization(format!(
                "channel threads {:?} panicked",
                panicked
            )));
        }
        info!("storage stopped");
        Ok(())
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "shutdown on drop failed");
        }
    }
}

/// Latest store timestamp found in every channel's transactions log
///
/// Channels without a log, or with an empty one, have nothing to confirm and
/// are left out.
fn consistent_store_timestamp(inventories: &[StorageInventory]) -> Option<u64> {
    inventories
        .iter()
        .filter_map(StorageInventory::analysis)
        .filter(|analysis| !analysis.is_empty())
        .map(|analysis| analysis.head_file_latest_timestamp)
        .min()
}

// =============================================================================
// Channel Thread
// =============================================================================

fn run_channel(
    mut storage: StorageChannel,
    tasks: Receiver<ChannelMessage>,
    operation: Arc<OperationController>,
    interval: Duration,
) {
    let channel = storage.channel();
    debug!(channel, "channel thread started");
    let mut next_housekeeping = Instant::now() + interval;

    loop {
        let wait = next_housekeeping.saturating_duration_since(Instant::now());
        match tasks.recv_timeout(wait) {
            Ok(ChannelMessage::Task(task)) => task(&mut storage),
            Ok(ChannelMessage::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        if Instant::now() < next_housekeeping {
            continue;
        }
        next_housekeeping = Instant::now() + interval;
        if !operation.check_processing_enabled() || operation.is_shutdown_requested() {
            continue;
        }
        if let Err(e) = storage.housekeeping() {
            if e.is_fatal() {
                operation.register_disruption(&e);
            } else {
                warn!(channel, error = %e, "housekeeping failed");
            }
        }
    }
    debug!(channel, "channel thread stopped");
}
