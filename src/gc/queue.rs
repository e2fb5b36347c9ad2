//! Per-channel object id mark queue
//!
//! Sibling channels append at the back; only the owning channel reads. Ids
//! are read without removal and dropped by `advance_tail` once processed,
//! so the pending count in the monitor never reaches zero while a batch is
//! still being worked on.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Result, StoreError};

/// FIFO of object ids awaiting marking
#[derive(Debug)]
pub struct ObjectIdMarkQueue {
    channel: usize,
    ids: Mutex<VecDeque<u64>>,
    available: Condvar,
}

impl ObjectIdMarkQueue {
    pub fn new(channel: usize) -> Self {
        Self {
            channel,
            ids: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn enqueue(&self, object_id: u64) {
        self.ids.lock().push_back(object_id);
        self.available.notify_all();
    }

    pub fn enqueue_bulk(&self, object_ids: &[u64]) {
        if object_ids.is_empty() {
            return;
        }
        self.ids.lock().extend(object_ids.iter().copied());
        self.available.notify_all();
    }

    /// Copy up to `max` ids from the front into `buffer` without removing them
    pub fn get_next(&self, buffer: &mut Vec<u64>, max: usize) -> usize {
        buffer.clear();
        let ids = self.ids.lock();
        buffer.extend(ids.iter().take(max).copied());
        buffer.len()
    }

    /// Drop `amount` processed ids from the front
    pub fn advance_tail(&self, amount: usize) -> Result<()> {
        let mut ids = self.ids.lock();
        if ids.len() < amount {
            return Err(StoreError::GarbageCollector {
                channel: self.channel,
                message: format!(
                    "advancing mark queue by {} with only {} ids queued",
                    amount,
                    ids.len()
                ),
            });
        }
        ids.drain(..amount);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    /// Wait up to `timeout` for ids; true if any are queued afterwards
    pub fn wait_for_elements(&self, timeout: Duration) -> bool {
        let mut ids = self.ids.lock();
        if !ids.is_empty() {
            return true;
        }
        // spurious wakeups are fine, callers re-check their state
        let _ = self.available.wait_for(&mut ids, timeout);
        !ids.is_empty()
    }

    /// Wake a waiting channel without enqueuing anything
    pub fn notify(&self) {
        self.available.notify_all();
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, VecDeque<u64>> {
        self.ids.lock()
    }
}
