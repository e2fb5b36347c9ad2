//! Backup item queue
//!
//! Unbounded FIFO connecting the channels' file writers to the backup thread.

use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::error::{Result, StoreError};
use crate::file::ChannelFile;

/// One mirrored file mutation
#[derive(Debug, Clone)]
pub enum BackupItem {
    /// Copy `[position, position + length)` of the source to the backup file
    Copy {
        source: Arc<ChannelFile>,
        position: u64,
        length: u64,
    },
    /// Truncate the backup copy to `length`
    Truncate { file: Arc<ChannelFile>, length: u64 },
    /// Delete the backup copy
    Delete { file: Arc<ChannelFile> },
}

/// Producer side, cloned into every channel's writer
#[derive(Debug, Clone)]
pub struct BackupItemEnqueuer {
    sender: Sender<BackupItem>,
}

impl BackupItemEnqueuer {
    pub fn enqueue(&self, item: BackupItem) -> Result<()> {
        self.sender
            .send(item)
            .map_err(|_| StoreError::Backup("backup item queue closed".to_string()))
    }
}

/// Consumer side, owned by the backup handler
#[derive(Debug)]
pub struct BackupItemQueue {
    sender: Sender<BackupItem>,
    receiver: Receiver<BackupItem>,
}

impl Default for BackupItemQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl BackupItemQueue {
    pub fn new() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self { sender, receiver }
    }

    pub fn enqueuer(&self) -> BackupItemEnqueuer {
        BackupItemEnqueuer {
            sender: self.sender.clone(),
        }
    }

    /// Next item, waiting at most `timeout`
    pub fn next(&self, timeout: Duration) -> Option<BackupItem> {
        match self.receiver.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub(crate) fn receiver(&self) -> &Receiver<BackupItem> {
        &self.receiver
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }
}
