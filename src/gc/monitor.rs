//! Mark Monitor
//!
//! The single structure shared by every channel thread during garbage
//! collection. One central lock guards the pending mark count, pending store
//! updates, the sweep flags and the hot/cold completion state. Mark queues
//! have their own locks; when both are needed the monitor lock is taken
//! first, and all queues are locked in index order.
//!
//! ```text
//!   marking ──(pending == 0, no store updates)──► sweep (all channels)
//!      ▲                                               │
//!      └──── root oid enqueued ◄── last channel done ──┘
//!                                   generation += 1
//!                                   hot → cold → idle
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

use super::queue::ObjectIdMarkQueue;

#[derive(Debug)]
struct MonitorState {
    pending_marks: u64,
    pending_store_updates: Vec<bool>,
    pending_store_update_count: usize,
    needs_sweep: Vec<bool>,
    sweeping_channel_count: usize,
    sweep_generation: u64,
    hot_complete: bool,
    cold_complete: bool,
    channel_root_oids: Vec<u64>,
}

impl MonitorState {
    fn is_marking_complete(&self) -> bool {
        self.pending_marks == 0 && self.pending_store_update_count == 0
    }
}

/// Snapshot of the monitor for statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkMonitorStatus {
    pub pending_marks: u64,
    pub pending_store_updates: usize,
    pub sweeping_channels: usize,
    pub sweep_generation: u64,
    pub hot_complete: bool,
    pub cold_complete: bool,
}

/// Cross-channel garbage collection coordinator
#[derive(Debug)]
pub struct MarkMonitor {
    state: Mutex<MonitorState>,
    queues: Vec<Arc<ObjectIdMarkQueue>>,
    channel_mask: u64,
}

impl MarkMonitor {
    /// `channel_count` must be a power of two
    pub fn new(channel_count: usize) -> Self {
        let queues = (0..channel_count)
            .map(|channel| Arc::new(ObjectIdMarkQueue::new(channel)))
            .collect();
        Self {
            state: Mutex::new(MonitorState {
                pending_marks: 0,
                pending_store_updates: vec![false; channel_count],
                pending_store_update_count: 0,
                needs_sweep: vec![false; channel_count],
                sweeping_channel_count: 0,
                sweep_generation: 0,
                // nothing stored yet, nothing to collect
                hot_complete: true,
                cold_complete: true,
                channel_root_oids: vec![0; channel_count],
            }),
            queues,
            channel_mask: channel_count as u64 - 1,
        }
    }

    pub fn channel_count(&self) -> usize {
        self.queues.len()
    }

    pub fn channel_of(&self, object_id: u64) -> usize {
        (object_id & self.channel_mask) as usize
    }

    /// The mark queue owned by `channel`
    pub fn queue(&self, channel: usize) -> &Arc<ObjectIdMarkQueue> {
        &self.queues[channel]
    }

    // =========================================================================
    // Marking
    // =========================================================================

    pub fn enqueue(&self, object_id: u64) {
        if object_id == 0 {
            return;
        }
        self.state.lock().pending_marks += 1;
        self.queues[self.channel_of(object_id)].enqueue(object_id);
    }

    /// Move every per-channel buffer into its queue and clear the buffers
    pub fn enqueue_bulk(&self, buffers: &mut [Vec<u64>]) {
        let total: usize = buffers.iter().map(Vec::len).sum();
        if total == 0 {
            return;
        }

        let mut state = self.state.lock();
        state.pending_marks += total as u64;
        for (channel, buffer) in buffers.iter_mut().enumerate() {
            self.queues[channel].enqueue_bulk(buffer);
            buffer.clear();
        }
    }

    /// Account for `amount` processed ids taken from `queue`
    pub fn advance_marking(&self, queue: &ObjectIdMarkQueue, amount: usize) -> Result<()> {
        let mut state = self.state.lock();
        if state.pending_marks < amount as u64 {
            return Err(StoreError::GarbageCollector {
                channel: queue.channel(),
                message: format!(
                    "advancing marking by {} with only {} marks pending",
                    amount, state.pending_marks
                ),
            });
        }
        queue.advance_tail(amount)?;
        state.pending_marks -= amount as u64;
        Ok(())
    }

    // =========================================================================
    // Store Coordination
    // =========================================================================

    /// A store in `channel` is about to update entities
    pub fn register_pending_store_update(&self, channel: usize) {
        let mut state = self.state.lock();
        if !state.pending_store_updates[channel] {
            state.pending_store_updates[channel] = true;
            state.pending_store_update_count += 1;
        }
    }

    pub fn clear_pending_store_update(&self, channel: usize) {
        let mut state = self.state.lock();
        if state.pending_store_updates[channel] {
            state.pending_store_updates[channel] = false;
            state.pending_store_update_count -= 1;
        }
    }

    /// New data arrived, both completion phases have to run again
    pub fn reset_completion(&self) {
        let mut state = self.state.lock();
        state.hot_complete = false;
        state.cold_complete = false;
    }

    // =========================================================================
    // Sweep
    // =========================================================================

    /// A sweep for `channel` has been called and not yet completed
    pub fn is_pending_sweep(&self, channel: usize) -> bool {
        self.state.lock().needs_sweep[channel]
    }

    /// Whether `channel` has to sweep now, calling the sweep if marking is done
    pub fn needs_sweep(&self, channel: usize) -> Result<bool> {
        let mut state = self.state.lock();
        if state.needs_sweep[channel] {
            return Ok(true);
        }
        self.call_to_sweep_required(&mut state)?;
        Ok(state.needs_sweep[channel])
    }

    fn call_to_sweep_required(&self, state: &mut MonitorState) -> Result<bool> {
        if state.sweeping_channel_count != 0 || !state.is_marking_complete() {
            return Ok(false);
        }

        // Step 1: no marks may be left over in any queue
        {
            let guards: Vec<_> = self.queues.iter().map(|q| q.lock()).collect();
            for (channel, ids) in guards.iter().enumerate() {
                if !ids.is_empty() {
                    return Err(StoreError::GarbageCollector {
                        channel,
                        message: format!(
                            "mark queue holds {} ids with no marks pending",
                            ids.len()
                        ),
                    });
                }
            }
        }

        // Step 2: every channel sweeps once
        for root in state.channel_root_oids.iter_mut() {
            *root = 0;
        }
        for flag in state.needs_sweep.iter_mut() {
            *flag = true;
        }
        state.sweeping_channel_count = self.queues.len();
        debug!(generation = state.sweep_generation, "Marking complete, sweep called");
        Ok(true)
    }

    /// `channel` finished its sweep; `root_object_id` is its local root (0 if none)
    pub fn complete_sweep(&self, channel: usize, root_object_id: u64) -> Result<()> {
        let mut state = self.state.lock();
        if !state.needs_sweep[channel] {
            return Err(StoreError::GarbageCollector {
                channel,
                message: "completing a sweep that was never called".to_string(),
            });
        }

        state.needs_sweep[channel] = false;
        state.channel_root_oids[channel] = root_object_id;
        state.sweeping_channel_count -= 1;
        if state.sweeping_channel_count > 0 {
            return Ok(());
        }

        state.sweep_generation += 1;
        self.advance_completion(&mut state);

        let root = state.channel_root_oids.iter().copied().max().unwrap_or(0);
        if root != 0 {
            state.pending_marks += 1;
            self.queues[self.channel_of(root)].enqueue(root);
        }
        Ok(())
    }

    fn advance_completion(&self, state: &mut MonitorState) {
        if state.cold_complete {
            debug!(generation = state.sweep_generation, "GC not needed");
        } else if state.hot_complete {
            state.cold_complete = true;
            info!(generation = state.sweep_generation, "GC cold phase complete");
        } else {
            state.hot_complete = true;
            info!(generation = state.sweep_generation, "GC hot phase complete");
        }
    }

    // =========================================================================
    // Completion
    // =========================================================================

    /// Whether `channel` has nothing left to collect
    pub fn is_complete(&self, channel: usize) -> bool {
        let state = self.state.lock();
        state.cold_complete
            || (state.hot_complete
                && state.sweeping_channel_count > 0
                && !state.needs_sweep[channel])
    }

    pub fn is_hot_complete(&self) -> bool {
        self.state.lock().hot_complete
    }

    pub fn is_cold_complete(&self) -> bool {
        self.state.lock().cold_complete
    }

    pub fn sweep_generation(&self) -> u64 {
        self.state.lock().sweep_generation
    }

    pub fn status(&self) -> MarkMonitorStatus {
        let state = self.state.lock();
        MarkMonitorStatus {
            pending_marks: state.pending_marks,
            pending_store_updates: state.pending_store_update_count,
            sweeping_channels: state.sweeping_channel_count,
            sweep_generation: state.sweep_generation,
            hot_complete: state.hot_complete,
            cold_complete: state.cold_complete,
        }
    }

    /// Wake every channel waiting for marking work
    pub fn notify_all(&self) {
        for queue in &self.queues {
            queue.notify();
        }
    }
}
