//! Garbage collection over the entity cache
//!
//! Tri-color mark and sweep, driven in deadline-bounded increments by the
//! channel thread and coordinated across channels by the Mark Monitor.
//!
//! - Stores force-mark what they write: reference-free entities turn Black,
//!   the others Gray and are queued so a reference that slipped past a
//!   running mark is still followed. With a sweep already called they turn
//!   Black directly.
//! - Sweeping keeps marked entities and whatever the application still
//!   reaches, deletes the rest and resets survivors to White.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::file::FileManager;

use super::entity::{EntityRef, EntityView, GcColor};
use super::entity_cache::EntityCache;

impl EntityCache {
    /// Garbage collection runs only with a configured root type
    pub fn is_gc_active(&self) -> bool {
        self.gc_enabled && self.root_type_id.is_some()
    }

    pub(super) fn mark_entity_for_changed_data(&mut self, entity: EntityRef) {
        if !self.is_gc_active() {
            return;
        }
        if self.has_update_pending_sweep {
            self.set_color(entity, GcColor::Black);
        } else if self.arena[entity].has_references() {
            self.set_color(entity, GcColor::Gray);
            self.monitor.enqueue(self.arena[entity].object_id);
        } else {
            self.set_color(entity, GcColor::Black);
        }
    }

    // =========================================================================
    // Marking
    // =========================================================================

    /// Process mark queue batches until the queue is empty or the deadline hits
    pub fn incremental_mark(&mut self, files: &FileManager, deadline: Instant) -> Result<()> {
        let mut buffer = std::mem::take(&mut self.mark_buffer);
        let result = self.mark_batches(files, &mut buffer, deadline);
        self.mark_buffer = buffer;
        result
    }

    fn mark_batches(&mut self, files: &FileManager, buffer: &mut Vec<u64>, deadline: Instant) -> Result<()> {
        let queue = Arc::clone(self.monitor.queue(self.channel));
        loop {
            let count = queue.get_next(buffer, self.marking_buffer_length);
            if count == 0 {
                return Ok(());
            }

            let evaluation_time = self.evaluation_time_ms();
            for &object_id in buffer.iter() {
                let Some(entity) = self.lookup(object_id) else {
                    if !self.zombie_handler.handle_zombie_oid(object_id) {
                        warn!(channel = self.channel, object_id, "zombie object id in mark queue");
                    }
                    continue;
                };
                if self.arena[entity].gc_color == GcColor::Black {
                    continue;
                }

                if self.arena[entity].has_references() {
                    let loaded = self.ensure_references_cached(files, entity)?;
                    self.mark_references(entity);
                    if loaded {
                        let view = EntityView::from(&self.arena[entity]);
                        if self
                            .cache_evaluator
                            .clear_entity_cache(self.used_cache_size, evaluation_time, &view)
                        {
                            self.used_cache_size -= self.arena[entity].clear_cache();
                        }
                    }
                }
                self.set_color(entity, GcColor::Black);
            }

            self.marker.try_flush();
            self.monitor.advance_marking(&queue, count)?;

            if Instant::now() >= deadline {
                return Ok(());
            }
        }
    }

    fn mark_references(&mut self, entity: EntityRef) {
        let type_ref = self.arena[entity].type_ref;
        let handler = Arc::clone(&self.types.get(type_ref).handler);
        let record = self.arena[entity].cache.as_deref().unwrap_or(&[]);
        let marker = &mut self.marker;
        handler.iterate_reference_ids(record, &mut |id| marker.mark(id));
        let now = self.touch_time();
        self.arena[entity].last_touched = now;
    }

    // =========================================================================
    // Sweep
    // =========================================================================

    /// Delete everything unmarked; false if the application could not answer
    fn sweep(&mut self, files: &mut FileManager) -> Result<bool> {
        // Step 1: ask the application about unmarked candidates
        let candidates = self.unmarked_object_ids();
        let reachable = if candidates.is_empty() {
            Default::default()
        } else {
            match self.live_checker.select_reachable(&candidates) {
                Some(reachable) => reachable,
                None => {
                    debug!(channel = self.channel, "live object registry unavailable, sweep deferred");
                    return Ok(false);
                }
            }
        };

        // Step 2: delete or reset
        let mut deleted = 0usize;
        let mut root_object_id = 0u64;
        for entity in self.all_entities() {
            let (object_id, marked) = {
                let slot = &self.arena[entity];
                (slot.object_id, slot.gc_color.is_marked())
            };
            if !marked && !reachable.contains(&object_id) {
                self.delete_entity(files, entity)?;
                deleted += 1;
                continue;
            }
            self.set_color(entity, GcColor::White);
            if Some(self.type_id_of(&self.arena[entity])) == self.root_type_id {
                root_object_id = root_object_id.max(object_id);
            }
        }

        // Step 3: report
        self.monitor.complete_sweep(self.channel, root_object_id)?;
        files.restart_file_cleanup_cursor();

        info!(
            channel = self.channel,
            deleted,
            remaining = self.entity_count(),
            root = root_object_id,
            "sweep complete"
        );
        Ok(true)
    }

    // =========================================================================
    // Driving
    // =========================================================================

    /// One deadline-bounded step; true when collection is complete
    pub fn incremental_garbage_collection(&mut self, files: &mut FileManager, deadline: Instant) -> Result<bool> {
        if !self.is_gc_active() {
            return Ok(true);
        }
        if self.monitor.is_complete(self.channel) {
            self.on_gc_complete();
            return Ok(true);
        }
        self.consolidated = false;

        if self.monitor.needs_sweep(self.channel)? {
            if !self.sweep(files)? {
                return Ok(false);
            }
            if self.monitor.is_complete(self.channel) {
                self.on_gc_complete();
                return Ok(true);
            }
            return Ok(false);
        }

        self.incremental_mark(files, deadline)?;
        Ok(false)
    }

    /// Collect until complete, the deadline passes or `keep_running` says stop
    ///
    /// With an empty queue the thread waits for marks from other channels,
    /// bounded by the marking wait time.
    pub fn issued_garbage_collection(
        &mut self,
        files: &mut FileManager,
        deadline: Instant,
        keep_running: &dyn Fn() -> bool,
    ) -> Result<bool> {
        let queue = Arc::clone(self.monitor.queue(self.channel));
        loop {
            if self.incremental_garbage_collection(files, deadline)? {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline || !keep_running() {
                return Ok(false);
            }
            if queue.is_empty() {
                let wait = self.marking_wait.min(deadline - now);
                queue.wait_for_elements(wait);
            }
        }
    }

    fn on_gc_complete(&mut self) {
        if !self.consolidated {
            self.consolidate();
            self.consolidated = true;
            debug!(channel = self.channel, table = self.table_length(), "GC complete");
        }
    }
}
