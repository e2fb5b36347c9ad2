//! Channel file handle
//!
//! Thin wrapper over a lazily opened `std::fs::File` offering the primitives
//! the file manager and backup need: size, positional reads, appends,
//! truncation, deletion, moves and range copies. Every IO failure is tagged
//! as reading or writing with the file's path.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{Result, StoreError};

/// Chunk size for range copies
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Role of a file within a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileKind {
    Data { number: u64 },
    Transactions,
}

/// A channel-owned file
///
/// Shared as `Arc<ChannelFile>` with the backup thread; the strong count
/// doubles as the file's user count.
#[derive(Debug)]
pub struct ChannelFile {
    channel: usize,
    kind: FileKind,
    path: PathBuf,
    handle: Mutex<Option<File>>,
}

impl ChannelFile {
    pub fn new(channel: usize, kind: FileKind, path: impl Into<PathBuf>) -> Self {
        Self {
            channel,
            kind,
            path: path.into(),
            handle: Mutex::new(None),
        }
    }

    pub fn channel(&self) -> usize {
        self.channel
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Data file number, `None` for the transactions file
    pub fn number(&self) -> Option<u64> {
        match self.kind {
            FileKind::Data { number } => Some(number),
            FileKind::Transactions => None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Physical length in bytes, 0 if the file does not exist
    pub fn size(&self) -> Result<u64> {
        match fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(StoreError::reading(&self.path, e)),
        }
    }

    /// Create the file (and its directory) if missing
    pub fn ensure_exists(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        self.open(&mut handle)?;
        Ok(())
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Fill `buffer` from `position`
    pub fn read_at(&self, position: u64, buffer: &mut [u8]) -> Result<()> {
        let mut handle = self.handle.lock();
        let file = self.open(&mut handle)?;
        file.seek(SeekFrom::Start(position))
            .map_err(|e| StoreError::reading(&self.path, e))?;
        file.read_exact(buffer)
            .map_err(|e| StoreError::reading(&self.path, e))
    }

    pub fn read_range(&self, position: u64, length: usize) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; length];
        self.read_at(position, &mut buffer)?;
        Ok(buffer)
    }

    /// Entire file content
    pub fn read_all(&self) -> Result<Vec<u8>> {
        let size = self.size()?;
        self.read_range(0, size as usize)
    }

    /// CRC32 of a byte range
    pub fn checksum(&self, position: u64, length: u64) -> Result<u32> {
        let mut hasher = crc32fast::Hasher::new();
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE.min(length as usize)];
        let mut done = 0u64;
        while done < length {
            let chunk = (length - done).min(buffer.len() as u64) as usize;
            self.read_at(position + done, &mut buffer[..chunk])?;
            hasher.update(&buffer[..chunk]);
            done += chunk as u64;
        }
        Ok(hasher.finalize())
    }

    // =========================================================================
    // Writing
    // =========================================================================

    /// Append all chunks at the end of the file, returning the bytes written
    pub fn append<B: AsRef<[u8]>>(&self, chunks: &[B]) -> Result<u64> {
        let mut handle = self.handle.lock();
        let file = self.open(&mut handle)?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| StoreError::writing(&self.path, e))?;

        let mut written = 0u64;
        for chunk in chunks {
            let bytes = chunk.as_ref();
            file.write_all(bytes)
                .map_err(|e| StoreError::writing(&self.path, e))?;
            written += bytes.len() as u64;
        }
        Ok(written)
    }

    /// Append and force the bytes to stable storage
    pub fn append_synced(&self, bytes: &[u8]) -> Result<u64> {
        let written = self.append(&[bytes])?;
        self.sync()?;
        Ok(written)
    }

    pub fn sync(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if let Some(file) = handle.as_mut() {
            file.sync_data()
                .map_err(|e| StoreError::writing(&self.path, e))?;
        }
        Ok(())
    }

    /// Cut the file down to `length` bytes
    pub fn truncate(&self, length: u64) -> Result<()> {
        let mut handle = self.handle.lock();
        let file = self.open(&mut handle)?;
        file.set_len(length)
            .map_err(|e| StoreError::writing(&self.path, e))?;
        file.sync_all()
            .map_err(|e| StoreError::writing(&self.path, e))
    }

    /// Append `length` bytes of this file starting at `position` to `target`
    pub fn copy_range_to(&self, position: u64, length: u64, target: &ChannelFile) -> Result<u64> {
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE.min(length as usize).max(1)];
        let mut copied = 0u64;
        while copied < length {
            let chunk = (length - copied).min(buffer.len() as u64) as usize;
            self.read_at(position + copied, &mut buffer[..chunk])?;
            copied += target.append(&[&buffer[..chunk]])?;
        }
        target.sync()?;
        Ok(copied)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Flush and release the OS handle; it reopens on next use
    pub fn close(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        if let Some(file) = handle.take() {
            file.sync_all()
                .map_err(|e| StoreError::writing(&self.path, e))?;
        }
        Ok(())
    }

    pub fn delete(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        handle.take();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::writing(&self.path, e)),
        }
    }

    /// Move the file to `target`, replacing whatever is there
    pub fn move_to(&self, target: &Path) -> Result<()> {
        let mut handle = self.handle.lock();
        handle.take();
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::writing(parent, e))?;
        }
        fs::rename(&self.path, target).map_err(|e| StoreError::writing(&self.path, e))
    }

    fn open<'a>(&self, handle: &'a mut Option<File>) -> Result<&'a mut File> {
        if handle.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent).map_err(|e| StoreError::writing(parent, e))?;
            }
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)
                .map_err(|e| StoreError::writing(&self.path, e))?;
            *handle = Some(file);
        }
        handle
            .as_mut()
            .ok_or_else(|| StoreError::Initialization(format!("{} not open", self.path.display())))
    }
}
