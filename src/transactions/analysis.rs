//! Transactions log analysis
//!
//! Replays a log forward while enforcing its consistency rules and condenses
//! it into what recovery needs: the logged length of every file and the
//! store state of the head file.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::error::{Result, StoreError};

use super::entry::TransactionEntry;
use super::reader::{process_file, EntryProcessor};

/// Logged state of one data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggedFile {
    pub number: u64,
    pub length: u64,
    pub created_at: u64,
    pub deleted: bool,
}

/// Result of replaying a transactions log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionsAnalysis {
    /// Every file the log mentions, by number
    pub files: BTreeMap<u64, LoggedFile>,

    /// Number of the last created file
    pub head_file_number: Option<u64>,

    pub head_file_last_consistent_store_length: u64,
    pub head_file_last_consistent_store_timestamp: u64,
    pub head_file_latest_length: u64,
    pub head_file_latest_timestamp: u64,

    /// Highest timestamp of any entry
    pub max_timestamp: u64,

    pub entry_count: u64,

    /// Log position after the last complete entry
    pub consumed_length: u64,
}

impl TransactionsAnalysis {
    /// Replay the log at `path`; a missing file yields `None`
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let mut aggregator = EntryAggregator::new();
        let consumed = process_file(path, &mut aggregator)?;
        let analysis = aggregator.finish(consumed);

        debug!(
            path = %path.display(),
            entries = analysis.entry_count,
            files = analysis.files.len(),
            "analyzed transactions log"
        );

        Ok(Some(analysis))
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    /// Files not marked deleted, ascending by number
    pub fn live_files(&self) -> impl Iterator<Item = &LoggedFile> {
        self.files.values().filter(|f| !f.deleted)
    }
}

// =============================================================================
// Entry Aggregator
// =============================================================================

/// Consistency-checking replay state
#[derive(Debug)]
pub struct EntryAggregator {
    files: BTreeMap<u64, LoggedFile>,
    current_file: Option<LoggedFile>,

    last_consistent_store_length: u64,
    last_consistent_store_timestamp: u64,
    current_store_length: u64,
    current_store_timestamp: u64,

    max_timestamp: u64,
    entry_count: u64,
}

impl Default for EntryAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryAggregator {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            current_file: None,
            last_consistent_store_length: 0,
            last_consistent_store_timestamp: 0,
            current_store_length: 0,
            current_store_timestamp: 0,
            max_timestamp: 0,
            entry_count: 0,
        }
    }

    /// Apply one decoded entry
    pub fn apply(&mut self, entry: TransactionEntry) -> Result<()> {
        match entry {
            TransactionEntry::FileCreation {
                timestamp,
                file_length,
                file_number,
            } => self.file_creation(timestamp, file_length, file_number)?,
            TransactionEntry::Store {
                timestamp,
                file_length,
            } => self.store(timestamp, file_length)?,
            TransactionEntry::Transfer { file_length, .. } => self.transfer(file_length)?,
            TransactionEntry::FileTruncation {
                file_length,
                file_number,
                ..
            } => self.truncation(file_length, file_number)?,
            TransactionEntry::FileDeletion { file_number, .. } => self.deletion(file_number)?,
        }

        self.max_timestamp = self.max_timestamp.max(entry.timestamp());
        self.entry_count += 1;
        Ok(())
    }

    /// Conclude the replay
    pub fn finish(mut self, consumed_length: u64) -> TransactionsAnalysis {
        let head_file_number = self.current_file.map(|f| f.number);
        self.register_current_file();

        TransactionsAnalysis {
            files: self.files,
            head_file_number,
            head_file_last_consistent_store_length: self.last_consistent_store_length,
            head_file_last_consistent_store_timestamp: self.last_consistent_store_timestamp,
            head_file_latest_length: self.current_store_length,
            head_file_latest_timestamp: self.current_store_timestamp,
            max_timestamp: self.max_timestamp,
            entry_count: self.entry_count,
            consumed_length,
        }
    }

    // =========================================================================
    // Entry Rules
    // =========================================================================

    fn file_creation(&mut self, timestamp: u64, file_length: u64, file_number: u64) -> Result<()> {
        if let Some(current) = self.current_file {
            if file_number <= current.number {
                return Err(StoreError::consistency(format!(
                    "file creation out of order: file {} after file {}",
                    file_number, current.number
                )));
            }
        }
        if self.files.contains_key(&file_number) {
            return Err(StoreError::consistency(format!(
                "file {} created twice",
                file_number
            )));
        }

        self.register_current_file();

        self.last_consistent_store_timestamp = self.current_store_timestamp;
        self.last_consistent_store_length = file_length;
        self.current_store_length = file_length;
        self.current_file = Some(LoggedFile {
            number: file_number,
            length: file_length,
            created_at: timestamp,
            deleted: false,
        });
        Ok(())
    }

    fn store(&mut self, timestamp: u64, file_length: u64) -> Result<()> {
        self.require_current_file("store")?;

        if file_length < self.current_store_length {
            return Err(StoreError::consistency(format!(
                "store length {} below current length {}",
                file_length, self.current_store_length
            )));
        }
        if timestamp <= self.current_store_timestamp {
            return Err(StoreError::consistency(format!(
                "store timestamp {} not after {}",
                timestamp, self.current_store_timestamp
            )));
        }

        self.last_consistent_store_length = self.current_store_length;
        self.last_consistent_store_timestamp = self.current_store_timestamp;
        self.current_store_length = file_length;
        self.current_store_timestamp = timestamp;
        Ok(())
    }

    fn transfer(&mut self, file_length: u64) -> Result<()> {
        self.require_current_file("transfer")?;

        if file_length < self.current_store_length {
            return Err(StoreError::consistency(format!(
                "transfer length {} below current length {}",
                file_length, self.current_store_length
            )));
        }

        self.last_consistent_store_length = file_length;
        self.current_store_length = file_length;
        Ok(())
    }

    fn truncation(&mut self, file_length: u64, file_number: u64) -> Result<()> {
        let current = self.require_current_file("truncation")?;
        if file_number != current.number {
            return Err(StoreError::consistency(format!(
                "truncation of file {} while head file is {}",
                file_number, current.number
            )));
        }
        if file_length > self.current_store_length {
            return Err(StoreError::consistency(format!(
                "truncation to {} exceeds current length {}",
                file_length, self.current_store_length
            )));
        }

        self.last_consistent_store_length = file_length;
        self.current_store_length = file_length;
        Ok(())
    }

    fn deletion(&mut self, file_number: u64) -> Result<()> {
        if let Some(current) = self.current_file {
            if current.number == file_number {
                return Err(StoreError::consistency(format!(
                    "deletion of head file {}",
                    file_number
                )));
            }
        }

        match self.files.get_mut(&file_number) {
            Some(file) if !file.deleted => {
                file.deleted = true;
                Ok(())
            }
            Some(_) => Err(StoreError::consistency(format!(
                "file {} deleted twice",
                file_number
            ))),
            None => Err(StoreError::consistency(format!(
                "deletion of unknown file {}",
                file_number
            ))),
        }
    }

    fn require_current_file(&self, action: &str) -> Result<LoggedFile> {
        self.current_file.ok_or_else(|| {
            StoreError::consistency(format!("{} entry before any file creation", action))
        })
    }

    fn register_current_file(&mut self) {
        if let Some(mut current) = self.current_file {
            current.length = self.current_store_length;
            self.files.insert(current.number, current);
        }
    }
}

impl EntryProcessor for EntryAggregator {
    fn accept(&mut self, _position: u64, bytes: &[u8]) -> Result<bool> {
        let entry = TransactionEntry::decode(bytes)?;
        self.apply(entry)?;
        Ok(true)
    }
}
