//! Entity Cache
//!
//! Per-channel index of every live entity.
//!
//! ## Responsibilities
//! - Object id hash table over the entity arena
//! - Type chains for type-ordered iteration
//! - Registering stored records and marking them for the garbage collector
//! - Loading record bytes on demand and evicting them again
//!
//! ## Hash Table
//! ```text
//!   bucket = (object_id >> log2(channel_count)) & (table.len() - 1)
//!
//!   table: [ e7 ]──hash_next──►[ e2 ]──►∅
//!          [ ∅  ]
//!          [ e4 ]──►∅
//! ```
//! The low object id bits select the channel, so they are shifted out
//! before bucketing.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::config::StorageConfig;
use crate::error::{Result, StoreError};
use crate::file::{index_records, FileManager, RecordSlot};
use crate::gc::{
    CachingReferenceMarker, IgnoringZombieOidHandler, LiveObjectIdChecker, MarkMonitor,
    NoLiveObjects, ZombieOidHandler,
};

use super::entity::{Entity, EntityArena, EntityRef, EntityView, GcColor, TOUCH_RESOLUTION_SHIFT};
use super::evaluator::{DefaultEntityCacheEvaluator, EntityCacheEvaluator};
use super::types::{TypeDictionary, TypeRegistry};

/// Per-channel entity index and garbage collector state
pub struct EntityCache {
    pub(super) channel: usize,
    pub(super) channel_mask: u64,
    channel_hash_shift: u32,

    pub(super) arena: EntityArena,
    pub(super) types: TypeRegistry,
    pub(super) dictionary: Arc<dyn TypeDictionary>,
    table: Vec<Option<EntityRef>>,

    pub(super) monitor: Arc<MarkMonitor>,
    pub(super) marker: CachingReferenceMarker,
    pub(super) cache_evaluator: Arc<dyn EntityCacheEvaluator>,
    pub(super) zombie_handler: Arc<dyn ZombieOidHandler>,
    pub(super) live_checker: Arc<dyn LiveObjectIdChecker>,

    pub(super) used_cache_size: u64,
    started: Instant,

    pub(super) gc_enabled: bool,
    pub(super) root_type_id: Option<u64>,
    pub(super) marking_buffer_length: usize,
    pub(super) marking_wait: Duration,
    pub(super) mark_buffer: Vec<u64>,
    pub(super) has_update_pending_sweep: bool,
    pub(super) consolidated: bool,

    check_cursor: Option<EntityRef>,
    check_progress: usize,
    /// Payloads cleared so far in the current check cycle
    check_cleared: usize,
}

impl EntityCache {
    pub fn new(
        channel: usize,
        config: &StorageConfig,
        dictionary: Arc<dyn TypeDictionary>,
        monitor: Arc<MarkMonitor>,
    ) -> Self {
        let marker = CachingReferenceMarker::new(Arc::clone(&monitor), config.reference_cache_length);
        Self {
            channel,
            channel_mask: config.channel_mask(),
            channel_hash_shift: config.channel_count.trailing_zeros(),
            arena: EntityArena::new(),
            types: TypeRegistry::new(),
            dictionary,
            table: vec![None],
            monitor,
            marker,
            cache_evaluator: Arc::new(DefaultEntityCacheEvaluator::from_config(config)),
            zombie_handler: Arc::new(IgnoringZombieOidHandler),
            live_checker: Arc::new(NoLiveObjects),
            used_cache_size: 0,
            started: Instant::now(),
            gc_enabled: config.gc_enabled,
            root_type_id: config.root_type_id,
            marking_buffer_length: config.marking_buffer_length,
            marking_wait: Duration::from_millis(config.marking_wait_time_ms),
            mark_buffer: Vec::with_capacity(config.marking_buffer_length),
            has_update_pending_sweep: false,
            consolidated: false,
            check_cursor: None,
            check_progress: 0,
            check_cleared: 0,
        }
    }

    pub fn with_cache_evaluator(mut self, evaluator: Arc<dyn EntityCacheEvaluator>) -> Self {
        self.cache_evaluator = evaluator;
        self
    }

    pub fn with_zombie_handler(mut self, handler: Arc<dyn ZombieOidHandler>) -> Self {
        self.zombie_handler = handler;
        self
    }

    pub fn with_live_checker(mut self, checker: Arc<dyn LiveObjectIdChecker>) -> Self {
        self.live_checker = checker;
        self
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn entity_count(&self) -> usize {
        self.arena.len()
    }

    pub fn used_cache_size(&self) -> u64 {
        self.used_cache_size
    }

    pub fn table_length(&self) -> usize {
        self.table.len()
    }

    pub fn arena(&self) -> &EntityArena {
        &self.arena
    }

    pub(crate) fn arena_mut(&mut self) -> &mut EntityArena {
        &mut self.arena
    }

    /// Entity registered for `object_id`
    pub fn get_entry(&self, object_id: u64) -> Option<&Entity> {
        self.lookup(object_id).map(|e| &self.arena[e])
    }

    /// Type id of an entity
    pub fn type_id_of(&self, entity: &Entity) -> u64 {
        self.types.get(entity.type_ref).type_id
    }

    /// Every live object id of `type_id`, in type chain order
    pub fn object_ids_of_type(&self, type_id: u64) -> Vec<u64> {
        self.type_chain(type_id)
            .into_iter()
            .map(|e| self.arena[e].object_id)
            .collect()
    }

    pub(crate) fn type_chain(&self, type_id: u64) -> Vec<EntityRef> {
        let mut chain = Vec::new();
        if let Some(type_ref) = self.types.lookup(type_id) {
            let mut cursor = self.types.get(type_ref).head;
            while let Some(entity) = cursor {
                chain.push(entity);
                cursor = self.arena[entity].type_next;
            }
        }
        chain
    }

    /// Every live entity, type by type
    pub(super) fn all_entities(&self) -> Vec<EntityRef> {
        let mut all = Vec::with_capacity(self.arena.len());
        for type_ref in self.types.refs() {
            let mut cursor = self.types.get(type_ref).head;
            while let Some(entity) = cursor {
                all.push(entity);
                cursor = self.arena[entity].type_next;
            }
        }
        all
    }

    /// Cache clock in milliseconds
    pub(super) fn evaluation_time_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    pub(super) fn touch_time(&self) -> u32 {
        (self.evaluation_time_ms() >> TOUCH_RESOLUTION_SHIFT) as u32
    }

    // =========================================================================
    // Hash Index
    // =========================================================================

    fn bucket(&self, object_id: u64) -> usize {
        ((object_id >> self.channel_hash_shift) as usize) & (self.table.len() - 1)
    }

    pub(super) fn lookup(&self, object_id: u64) -> Option<EntityRef> {
        let mut cursor = self.table[self.bucket(object_id)];
        while let Some(entity) = cursor {
            if self.arena[entity].object_id == object_id {
                return Some(entity);
            }
            cursor = self.arena[entity].hash_next;
        }
        None
    }

    pub(super) fn validate_channel(&self, object_id: u64) -> Result<()> {
        if (object_id & self.channel_mask) as usize != self.channel {
            return Err(StoreError::consistency(format!(
                "object id {} does not belong to channel {}",
                object_id, self.channel
            )));
        }
        Ok(())
    }

    pub(super) fn hash_insert(&mut self, entity: EntityRef) {
        let bucket = self.bucket(self.arena[entity].object_id);
        self.arena[entity].hash_next = self.table[bucket];
        self.table[bucket] = Some(entity);

        if self.arena.len() > self.table.len() {
            self.rebuild_table(self.table.len() * 2);
        }
    }

    fn hash_remove(&mut self, entity: EntityRef) {
        let bucket = self.bucket(self.arena[entity].object_id);
        let next = self.arena[entity].hash_next;

        if self.table[bucket] == Some(entity) {
            self.table[bucket] = next;
        } else {
            let mut cursor = self.table[bucket];
            while let Some(current) = cursor {
                if self.arena[current].hash_next == Some(entity) {
                    self.arena[current].hash_next = next;
                    break;
                }
                cursor = self.arena[current].hash_next;
            }
        }
        self.arena[entity].hash_next = None;
    }

    fn rebuild_table(&mut self, length: usize) {
        let old = std::mem::replace(&mut self.table, vec![None; length.max(1)]);
        for head in old {
            let mut cursor = head;
            while let Some(entity) = cursor {
                cursor = self.arena[entity].hash_next;
                let bucket = self.bucket(self.arena[entity].object_id);
                self.arena[entity].hash_next = self.table[bucket];
                self.table[bucket] = Some(entity);
            }
        }
    }

    /// Shrink the table when at most half of it is used
    pub fn consolidate(&mut self) {
        let size = self.arena.len();
        if self.table.len() / 2 >= size && self.table.len() > 1 {
            let length = size.max(1).next_power_of_two();
            self.rebuild_table(length);
        }
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Entity for `object_id`, detached from its old file position if it exists
    pub(crate) fn put_entity(
        &mut self,
        object_id: u64,
        type_id: u64,
        files: &mut FileManager,
    ) -> Result<EntityRef> {
        self.validate_channel(object_id)?;
        let type_ref = self.types.resolve(type_id, object_id, &*self.dictionary)?;

        if let Some(entity) = self.lookup(object_id) {
            let current = self.arena[entity].type_ref;
            if current != type_ref {
                return Err(StoreError::consistency(format!(
                    "object id {} changes type from {} to {}",
                    object_id,
                    self.types.get(current).type_id,
                    type_id
                )));
            }
            self.used_cache_size -= self.arena[entity].clear_cache();
            files.detach_entity(&mut self.arena, entity)?;
            return Ok(entity);
        }

        let reference_count = self.types.get(type_ref).reference_count;
        let entity = self
            .arena
            .allocate(Entity::new(object_id, type_ref, reference_count));
        self.hash_insert(entity);
        self.types.link(&mut self.arena, entity);
        Ok(entity)
    }

    /// Check every record of a store before any byte is written
    ///
    /// Rejects foreign object ids, unknown types, type changes and records the
    /// type handler considers malformed.
    pub fn validate_records(&mut self, chunks: &[Bytes]) -> Result<()> {
        for chunk in chunks {
            for slot in index_records(chunk, 0)? {
                let RecordSlot::Entity { header, .. } = slot else {
                    continue;
                };
                self.validate_record(header.object_id, header.type_id, header.length)
                    .map_err(|cause| StoreError::InvalidRecord {
                        object_id: header.object_id,
                        cause: Box::new(cause),
                    })?;
            }
        }
        Ok(())
    }

    fn validate_record(&mut self, object_id: u64, type_id: u64, length: u64) -> Result<()> {
        self.validate_channel(object_id)?;
        let type_ref = self.types.resolve(type_id, object_id, &*self.dictionary)?;
        if let Some(entity) = self.lookup(object_id) {
            let current = self.arena[entity].type_ref;
            if current != type_ref {
                return Err(StoreError::consistency(format!(
                    "object id {} changes type from {} to {}",
                    object_id,
                    self.types.get(current).type_id,
                    type_id
                )));
            }
        }
        if length > u32::MAX as u64 {
            return Err(StoreError::consistency(format!(
                "record of object {} too long: {}",
                object_id, length
            )));
        }
        self.types
            .get(type_ref)
            .handler
            .validate_entity(length, object_id)
    }

    /// Index the records of a committed store
    ///
    /// `positions` holds the head file position of every chunk.
    pub fn post_store_put_entities(
        &mut self,
        files: &mut FileManager,
        chunks: &[Bytes],
        positions: &[u64],
    ) -> Result<usize> {
        self.has_update_pending_sweep = self.monitor.is_pending_sweep(self.channel);
        self.monitor.reset_completion();

        let now = self.touch_time();
        let evaluation_time = self.evaluation_time_ms();
        let mut count = 0;

        for (chunk, base) in chunks.iter().zip(positions.iter().copied()) {
            for slot in index_records(chunk, base)? {
                let RecordSlot::Entity { position, header } = slot else {
                    continue;
                };
                let length = u32::try_from(header.length).map_err(|_| {
                    StoreError::consistency(format!(
                        "record of object {} too long: {}",
                        header.object_id, header.length
                    ))
                })?;

                let entity = self.put_entity(header.object_id, header.type_id, files)?;
                {
                    let slot = &mut self.arena[entity];
                    slot.length = length;
                    slot.storage_position = position as u32;
                    slot.last_touched = now;
                }
                files.append_to_head(&mut self.arena, entity)?;

                let view = EntityView::from(&self.arena[entity]);
                let view = EntityView {
                    cached_length: view.length as u64,
                    ..view
                };
                if self
                    .cache_evaluator
                    .initially_cache_entity(self.used_cache_size, evaluation_time, &view)
                {
                    let start = (position - base) as usize;
                    let record = &chunk[start..start + length as usize];
                    self.arena[entity].cache = Some(record.to_vec().into_boxed_slice());
                    self.arena[entity].only_references_cached = false;
                    self.used_cache_size += length as u64;
                }

                self.mark_entity_for_changed_data(entity);
                count += 1;
            }
        }
        Ok(count)
    }

    /// Remove an entity from every structure and release its slot
    pub(super) fn delete_entity(&mut self, files: &mut FileManager, entity: EntityRef) -> Result<()> {
        self.hash_remove(entity);
        files.detach_entity(&mut self.arena, entity)?;
        self.types.unlink(&mut self.arena, entity);
        self.used_cache_size -= self.arena[entity].clear_cache();
        if self.check_cursor == Some(entity) {
            self.check_cursor = None;
        }
        self.arena.release(entity);
        Ok(())
    }

    // =========================================================================
    // Loading
    // =========================================================================

    /// Full record bytes of `object_id`, loading them if needed
    pub fn load_data(&mut self, files: &FileManager, object_id: u64) -> Result<Option<Bytes>> {
        let Some(entity) = self.lookup(object_id) else {
            return Ok(None);
        };
        self.ensure_fully_cached(files, entity)?;
        let now = self.touch_time();
        self.arena[entity].last_touched = now;
        Ok(self.arena[entity]
            .cache
            .as_deref()
            .map(Bytes::copy_from_slice))
    }

    /// Record bytes without touching the cache state
    pub(crate) fn read_record(&self, files: &FileManager, entity: EntityRef) -> Result<Vec<u8>> {
        let slot = &self.arena[entity];
        if slot.is_fully_cached() {
            if let Some(cache) = slot.cache.as_deref() {
                return Ok(cache.to_vec());
            }
        }
        let file = slot.file.ok_or_else(|| {
            StoreError::consistency(format!("object {} has no data file", slot.object_id))
        })?;
        files.read_entity(file, slot.storage_position as u64, slot.length as usize)
    }

    fn ensure_fully_cached(&mut self, files: &FileManager, entity: EntityRef) -> Result<()> {
        if self.arena[entity].is_fully_cached() {
            return Ok(());
        }
        let bytes = self.read_record(files, entity)?;
        let slot = &mut self.arena[entity];
        self.used_cache_size -= slot.clear_cache();
        self.used_cache_size += bytes.len() as u64;
        slot.cache = Some(bytes.into_boxed_slice());
        Ok(())
    }

    /// Make the reference slots resident; true if anything was loaded
    pub(super) fn ensure_references_cached(&mut self, files: &FileManager, entity: EntityRef) -> Result<bool> {
        let (file, position, length, reference_count, object_id) = {
            let slot = &self.arena[entity];
            if slot.cache.is_some() {
                return Ok(false);
            }
            (
                slot.file,
                slot.storage_position as u64,
                slot.length as usize,
                slot.reference_count,
                slot.object_id,
            )
        };
        let file = file.ok_or_else(|| {
            StoreError::consistency(format!("object {} has no data file", object_id))
        })?;

        let load_length = if reference_count > 0 {
            (crate::file::RECORD_HEADER_LENGTH + reference_count as usize * 8).min(length)
        } else {
            length
        };
        let bytes = files.read_entity(file, position, load_length)?;

        let slot = &mut self.arena[entity];
        slot.cache = Some(bytes.into_boxed_slice());
        slot.only_references_cached = load_length < length;
        self.used_cache_size += load_length as u64;
        Ok(true)
    }

    // =========================================================================
    // Cache Check
    // =========================================================================

    /// Drop every cached payload
    pub fn clear_cache(&mut self) {
        for entity in self.all_entities() {
            self.arena[entity].clear_cache();
        }
        self.used_cache_size = 0;
    }

    /// Evaluate cached entities in file order until the deadline
    ///
    /// Returns true once a full cycle over all entities completed without
    /// clearing anything, or immediately if nothing is cached.
    pub fn incremental_entity_cache_check(&mut self, files: &FileManager, deadline: Instant) -> Result<bool> {
        let evaluator = Arc::clone(&self.cache_evaluator);
        self.cache_check(files, deadline, &*evaluator)
    }

    /// Full pass from the oldest file with an ad hoc evaluator
    pub fn issued_entity_cache_check(
        &mut self,
        files: &FileManager,
        deadline: Instant,
        evaluator: Option<&dyn EntityCacheEvaluator>,
    ) -> Result<bool> {
        self.restart_cache_check();
        let default = Arc::clone(&self.cache_evaluator);
        let evaluator = evaluator.unwrap_or(&*default);
        loop {
            if self.cache_check(files, deadline, evaluator)? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    fn cache_check(
        &mut self,
        files: &FileManager,
        deadline: Instant,
        evaluator: &dyn EntityCacheEvaluator,
    ) -> Result<bool> {
        let evaluation_time = self.evaluation_time_ms();
        let mut evaluated = 0usize;

        loop {
            if self.used_cache_size == 0 {
                self.restart_cache_check();
                return Ok(true);
            }
            // at least one entity per call
            if evaluated > 0 && Instant::now() >= deadline {
                return Ok(false);
            }

            let Some(entity) = self.next_check_entity(files)? else {
                return Ok(self.finish_cache_check_cycle());
            };

            let view = EntityView::from(&self.arena[entity]);
            if view.cached_length > 0
                && evaluator.clear_entity_cache(self.used_cache_size, evaluation_time, &view)
            {
                self.used_cache_size -= self.arena[entity].clear_cache();
                self.check_cleared += 1;
            }

            self.check_cursor = Some(entity);
            self.check_progress += 1;
            evaluated += 1;

            if self.check_progress >= self.arena.len() {
                return Ok(self.finish_cache_check_cycle());
            }
        }
    }

    fn restart_cache_check(&mut self) {
        self.check_cursor = None;
        self.check_progress = 0;
        self.check_cleared = 0;
    }

    /// True if the finished cycle cleared nothing
    fn finish_cache_check_cycle(&mut self) -> bool {
        let idle = self.check_cleared == 0;
        self.restart_cache_check();
        idle
    }

    /// Successor of the check cursor in file order, wrapping around the ring
    fn next_check_entity(&self, files: &FileManager) -> Result<Option<EntityRef>> {
        let ring = files.ring();
        let start_file = match self.check_cursor {
            Some(cursor) => {
                if let Some(next) = self.arena[cursor].file_next {
                    return Ok(Some(next));
                }
                match self.arena[cursor].file {
                    Some(file) => ring.next_of(file)?,
                    None => match ring.oldest() {
                        Some(oldest) => oldest,
                        None => return Ok(None),
                    },
                }
            }
            None => match ring.oldest() {
                Some(oldest) => oldest,
                None => return Ok(None),
            },
        };

        let mut file = start_file;
        for _ in 0..=ring.len() {
            let data_file = ring.get(file)?;
            if let Some(first) = data_file.first {
                return Ok(Some(first));
            }
            file = data_file.next;
        }
        Ok(None)
    }

    /// Object ids of all entities not marked in the current cycle
    pub(super) fn unmarked_object_ids(&self) -> HashSet<u64> {
        self.all_entities()
            .into_iter()
            .filter(|e| !self.arena[*e].gc_color.is_marked())
            .map(|e| self.arena[e].object_id)
            .collect()
    }

    pub(super) fn set_color(&mut self, entity: EntityRef, color: GcColor) {
        self.arena[entity].gc_color = color;
    }
}
