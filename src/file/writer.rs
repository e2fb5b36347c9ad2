//! Pluggable file writer
//!
//! Every physical mutation of a channel's files goes through a `FileWriter`,
//! so decorators can observe them. `BackupMirroringWriter` forwards each
//! mutation to the backup item queue after it succeeded locally.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::backup::{BackupItem, BackupItemEnqueuer};
use crate::error::{Result, StoreError};

use super::channel_file::ChannelFile;

/// Physical write operations on channel files
pub trait FileWriter: Send {
    /// Create an empty file
    fn create(&mut self, file: &Arc<ChannelFile>) -> Result<()> {
        file.ensure_exists()
    }

    /// Append store chunks to the head file, returning the bytes written
    fn write_store(&mut self, file: &Arc<ChannelFile>, chunks: &[Bytes]) -> Result<u64> {
        let written = file.append(chunks)?;
        file.sync()?;
        Ok(written)
    }

    /// Stored bytes `[position, position + length)` became logically committed
    fn commit_store(&mut self, _file: &Arc<ChannelFile>, _position: u64, _length: u64) -> Result<()> {
        Ok(())
    }

    /// Copy a byte range of `source` to the end of `target`
    fn write_transfer(
        &mut self,
        source: &Arc<ChannelFile>,
        position: u64,
        length: u64,
        target: &Arc<ChannelFile>,
    ) -> Result<u64> {
        source.copy_range_to(position, length, target)
    }

    /// Append encoded entries to the transactions file, synced
    fn write_transactions(&mut self, file: &Arc<ChannelFile>, bytes: &[u8]) -> Result<u64> {
        file.append_synced(bytes)
    }

    /// Atomically replace the transactions file content with `bytes`
    fn replace_transactions(
        &mut self,
        file: &Arc<ChannelFile>,
        scratch: &Path,
        bytes: &[u8],
    ) -> Result<()> {
        fs::write(scratch, bytes).map_err(|e| StoreError::writing(scratch, e))?;
        file.close()?;
        fs::rename(scratch, file.path()).map_err(|e| StoreError::writing(file.path(), e))
    }

    fn truncate(&mut self, file: &Arc<ChannelFile>, length: u64) -> Result<()> {
        file.truncate(length)
    }

    /// Delete the file, or move it to `move_target` if given
    fn delete(&mut self, file: &Arc<ChannelFile>, move_target: Option<&Path>) -> Result<()> {
        match move_target {
            Some(target) => file.move_to(target),
            None => file.delete(),
        }
    }
}

/// Writes straight to the files
#[derive(Debug, Default)]
pub struct DirectFileWriter;

impl FileWriter for DirectFileWriter {}

/// Mirrors every completed mutation onto the backup queue
pub struct BackupMirroringWriter<W: FileWriter> {
    inner: W,
    backup: BackupItemEnqueuer,
}

impl<W: FileWriter> BackupMirroringWriter<W> {
    pub fn new(inner: W, backup: BackupItemEnqueuer) -> Self {
        Self { inner, backup }
    }
}

impl<W: FileWriter> FileWriter for BackupMirroringWriter<W> {
    fn create(&mut self, file: &Arc<ChannelFile>) -> Result<()> {
        self.inner.create(file)?;
        self.backup.enqueue(BackupItem::Copy {
            source: Arc::clone(file),
            position: 0,
            length: 0,
        })
    }

    fn write_store(&mut self, file: &Arc<ChannelFile>, chunks: &[Bytes]) -> Result<u64> {
        // mirrored once committed, rolled back bytes never reach the backup
        self.inner.write_store(file, chunks)
    }

    fn commit_store(&mut self, file: &Arc<ChannelFile>, position: u64, length: u64) -> Result<()> {
        self.inner.commit_store(file, position, length)?;
        self.backup.enqueue(BackupItem::Copy {
            source: Arc::clone(file),
            position,
            length,
        })
    }

    fn write_transfer(
        &mut self,
        source: &Arc<ChannelFile>,
        position: u64,
        length: u64,
        target: &Arc<ChannelFile>,
    ) -> Result<u64> {
        let target_position = target.size()?;
        let written = self.inner.write_transfer(source, position, length, target)?;
        self.backup.enqueue(BackupItem::Copy {
            source: Arc::clone(target),
            position: target_position,
            length: written,
        })?;
        Ok(written)
    }

    fn write_transactions(&mut self, file: &Arc<ChannelFile>, bytes: &[u8]) -> Result<u64> {
        let position = file.size()?;
        let written = self.inner.write_transactions(file, bytes)?;
        self.backup.enqueue(BackupItem::Copy {
            source: Arc::clone(file),
            position,
            length: written,
        })?;
        Ok(written)
    }

    fn replace_transactions(
        &mut self,
        file: &Arc<ChannelFile>,
        scratch: &Path,
        bytes: &[u8],
    ) -> Result<()> {
        self.inner.replace_transactions(file, scratch, bytes)?;
        self.backup.enqueue(BackupItem::Truncate {
            file: Arc::clone(file),
            length: 0,
        })?;
        self.backup.enqueue(BackupItem::Copy {
            source: Arc::clone(file),
            position: 0,
            length: bytes.len() as u64,
        })
    }

    fn truncate(&mut self, file: &Arc<ChannelFile>, length: u64) -> Result<()> {
        self.inner.truncate(file, length)?;
        self.backup.enqueue(BackupItem::Truncate {
            file: Arc::clone(file),
            length,
        })
    }

    fn delete(&mut self, file: &Arc<ChannelFile>, move_target: Option<&Path>) -> Result<()> {
        self.inner.delete(file, move_target)?;
        self.backup.enqueue(BackupItem::Delete {
            file: Arc::clone(file),
        })
    }
}
