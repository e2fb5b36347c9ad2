//! Transactions log compaction
//!
//! Rebuilds a log as the shortest entry sequence that replays to the same
//! live file set: one FileCreation per live file, followed by a Transfer
//! carrying its current length. Deleted files vanish from the log. A final
//! Store entry keeps the channel's last store timestamp for recovery.

use crate::error::{Result, StoreError};

use super::entry::TransactionEntry;

/// Collects live files and emits the compacted log bytes
#[derive(Debug, Default)]
pub struct TransactionsFileCleaner {
    buffer: Vec<u8>,
    last_number: Option<u64>,
    last_length: u64,
    file_count: usize,
}

impl TransactionsFileCleaner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the next live file; numbers must ascend
    pub fn add_file(&mut self, number: u64, created_at: u64, total_length: u64) -> Result<()> {
        if let Some(last) = self.last_number {
            if number <= last {
                return Err(StoreError::consistency(format!(
                    "compacted log files out of order: {} after {}",
                    number, last
                )));
            }
        }

        TransactionEntry::FileCreation {
            timestamp: created_at,
            file_length: 0,
            file_number: number,
        }
        .encode_into(&mut self.buffer);

        if total_length > 0 {
            TransactionEntry::Transfer {
                timestamp: created_at,
                file_length: total_length,
                source_file_number: number,
                source_offset: 0,
            }
            .encode_into(&mut self.buffer);
        }

        self.last_number = Some(number);
        self.last_length = total_length;
        self.file_count += 1;
        Ok(())
    }

    /// Close the log with the last store, at the last file's length
    pub fn add_store(&mut self, timestamp: u64) -> Result<()> {
        if self.last_number.is_none() {
            return Err(StoreError::consistency(format!(
                "compacted log store {} without any file",
                timestamp
            )));
        }
        TransactionEntry::Store {
            timestamp,
            file_length: self.last_length,
        }
        .encode_into(&mut self.buffer);
        Ok(())
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn finish(self) -> Vec<u8> {
        self.buffer
    }
}
