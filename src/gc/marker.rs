//! Reference marker with per-target-channel buffers
//!
//! Owned by one channel thread, so buffering needs no lock. Buffers move to
//! the monitor in one batched call when one fills up or the marking batch
//! ends.

use std::sync::Arc;

use super::monitor::MarkMonitor;

#[derive(Debug)]
pub struct CachingReferenceMarker {
    monitor: Arc<MarkMonitor>,
    buffers: Vec<Vec<u64>>,
    buffer_length: usize,
    buffered: usize,
}

impl CachingReferenceMarker {
    pub fn new(monitor: Arc<MarkMonitor>, buffer_length: usize) -> Self {
        let buffers = (0..monitor.channel_count())
            .map(|_| Vec::with_capacity(buffer_length))
            .collect();
        Self {
            monitor,
            buffers,
            buffer_length: buffer_length.max(1),
            buffered: 0,
        }
    }

    /// Buffer `object_id` for marking; the null id is ignored
    pub fn mark(&mut self, object_id: u64) {
        if object_id == 0 {
            return;
        }
        let channel = self.monitor.channel_of(object_id);
        self.buffers[channel].push(object_id);
        self.buffered += 1;
        if self.buffers[channel].len() >= self.buffer_length {
            self.flush();
        }
    }

    pub fn flush(&mut self) {
        self.monitor.enqueue_bulk(&mut self.buffers);
        self.buffered = 0;
    }

    /// Flush if anything is buffered
    pub fn try_flush(&mut self) {
        if self.buffered > 0 {
            self.flush();
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }
}
