//! Store timestamps
//!
//! Transactions log entries need strictly increasing timestamps per channel,
//! and all channels of one store share the same timestamp. Wall clock
//! nanoseconds are used, bumped by one whenever the clock stalls or steps
//! back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Default)]
pub struct TimestampProvider {
    last: AtomicU64,
}

impl TimestampProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Continue after `timestamp`, e.g. the newest one found during recovery
    pub fn starting_after(timestamp: u64) -> Self {
        Self {
            last: AtomicU64::new(timestamp),
        }
    }

    /// Raise the floor to at least `timestamp`
    pub fn advance_to(&self, timestamp: u64) {
        self.last.fetch_max(timestamp, Ordering::SeqCst);
    }

    /// Next timestamp, strictly above every one handed out before
    pub fn next(&self) -> u64 {
        let now = wall_clock_nanos();
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(last + 1);
            match self
                .last
                .compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return candidate,
                Err(current) => last = current,
            }
        }
    }

    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

pub(crate) fn wall_clock_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
