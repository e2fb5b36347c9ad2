//! Transactions log entry definitions
//!
//! Fixed-width, little-endian encoding of the five entry kinds.

use crate::error::{Result, StoreError};

// =============================================================================
// Layout Constants
// =============================================================================

const OFFSET_LENGTH: usize = 0;
const OFFSET_TYPE: usize = 1;
const OFFSET_TIMESTAMP: usize = 2;
const OFFSET_FILE_LENGTH: usize = 10;
const OFFSET_FILE_NUMBER: usize = 18;
const OFFSET_SPECIAL: usize = 26;

pub const LENGTH_FILE_CREATION: usize = 26;
pub const LENGTH_STORE: usize = 18;
pub const LENGTH_TRANSFER: usize = 34;
pub const LENGTH_FILE_TRUNCATION: usize = 34;
pub const LENGTH_FILE_DELETION: usize = 26;

/// Largest span a single length byte can describe
pub const MAX_ENTRY_LENGTH: usize = i8::MAX as usize;

// =============================================================================
// Entry Type
// =============================================================================

/// Kind tag stored in the second byte of every entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    FileCreation,
    Store,
    Transfer,
    FileTruncation,
    FileDeletion,
}

impl EntryType {
    pub fn code(self) -> u8 {
        match self {
            EntryType::FileCreation => 0,
            EntryType::Store => 1,
            EntryType::Transfer => 2,
            EntryType::FileTruncation => 3,
            EntryType::FileDeletion => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(EntryType::FileCreation),
            1 => Some(EntryType::Store),
            2 => Some(EntryType::Transfer),
            3 => Some(EntryType::FileTruncation),
            4 => Some(EntryType::FileDeletion),
            _ => None,
        }
    }

    /// Encoded byte length of entries of this kind
    pub fn length(self) -> usize {
        match self {
            EntryType::FileCreation => LENGTH_FILE_CREATION,
            EntryType::Store => LENGTH_STORE,
            EntryType::Transfer => LENGTH_TRANSFER,
            EntryType::FileTruncation => LENGTH_FILE_TRUNCATION,
            EntryType::FileDeletion => LENGTH_FILE_DELETION,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EntryType::FileCreation => "FILE_CREATION",
            EntryType::Store => "STORE",
            EntryType::Transfer => "TRANSFER",
            EntryType::FileTruncation => "FILE_TRUNCATION",
            EntryType::FileDeletion => "FILE_DELETION",
        }
    }
}

// =============================================================================
// Transaction Entry
// =============================================================================

/// A single decoded log entry
///
/// `file_length` is always the resulting length of the affected file: the
/// created file for FileCreation, the head file for Store, Transfer and
/// FileTruncation, the deleted file for FileDeletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionEntry {
    FileCreation {
        timestamp: u64,
        file_length: u64,
        file_number: u64,
    },
    Store {
        timestamp: u64,
        file_length: u64,
    },
    Transfer {
        timestamp: u64,
        file_length: u64,
        source_file_number: u64,
        source_offset: u64,
    },
    FileTruncation {
        timestamp: u64,
        file_length: u64,
        file_number: u64,
        old_length: u64,
    },
    FileDeletion {
        timestamp: u64,
        file_length: u64,
        file_number: u64,
    },
}

impl TransactionEntry {
    pub fn entry_type(&self) -> EntryType {
        match self {
            TransactionEntry::FileCreation { .. } => EntryType::FileCreation,
            TransactionEntry::Store { .. } => EntryType::Store,
            TransactionEntry::Transfer { .. } => EntryType::Transfer,
            TransactionEntry::FileTruncation { .. } => EntryType::FileTruncation,
            TransactionEntry::FileDeletion { .. } => EntryType::FileDeletion,
        }
    }

    pub fn timestamp(&self) -> u64 {
        match *self {
            TransactionEntry::FileCreation { timestamp, .. }
            | TransactionEntry::Store { timestamp, .. }
            | TransactionEntry::Transfer { timestamp, .. }
            | TransactionEntry::FileTruncation { timestamp, .. }
            | TransactionEntry::FileDeletion { timestamp, .. } => timestamp,
        }
    }

    pub fn file_length(&self) -> u64 {
        match *self {
            TransactionEntry::FileCreation { file_length, .. }
            | TransactionEntry::Store { file_length, .. }
            | TransactionEntry::Transfer { file_length, .. }
            | TransactionEntry::FileTruncation { file_length, .. }
            | TransactionEntry::FileDeletion { file_length, .. } => file_length,
        }
    }

    /// File number carried by the entry, if any
    pub fn file_number(&self) -> Option<u64> {
        match *self {
            TransactionEntry::FileCreation { file_number, .. }
            | TransactionEntry::FileTruncation { file_number, .. }
            | TransactionEntry::FileDeletion { file_number, .. } => Some(file_number),
            TransactionEntry::Transfer {
                source_file_number, ..
            } => Some(source_file_number),
            TransactionEntry::Store { .. } => None,
        }
    }

    /// Second positional value (source offset or old length), if any
    pub fn special_offset(&self) -> Option<u64> {
        match *self {
            TransactionEntry::Transfer { source_offset, .. } => Some(source_offset),
            TransactionEntry::FileTruncation { old_length, .. } => Some(old_length),
            _ => None,
        }
    }

    pub fn encoded_length(&self) -> usize {
        self.entry_type().length()
    }

    /// Append the encoded entry to `buffer`
    pub fn encode_into(&self, buffer: &mut Vec<u8>) {
        let kind = self.entry_type();
        buffer.push(kind.length() as u8);
        buffer.push(kind.code());
        buffer.extend_from_slice(&self.timestamp().to_le_bytes());
        buffer.extend_from_slice(&self.file_length().to_le_bytes());
        if let Some(number) = self.file_number() {
            buffer.extend_from_slice(&number.to_le_bytes());
        }
        if let Some(special) = self.special_offset() {
            buffer.extend_from_slice(&special.to_le_bytes());
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.encoded_length());
        self.encode_into(&mut buffer);
        buffer
    }

    /// Decode the entry starting at `bytes[0]`
    ///
    /// `bytes` may extend past the entry; too few bytes is an error, so
    /// callers scanning a stream check availability first.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 {
            return Err(StoreError::consistency(format!(
                "transactions entry header incomplete: {} bytes",
                bytes.len()
            )));
        }

        let length = bytes[OFFSET_LENGTH] as i8;
        let kind = EntryType::from_code(bytes[OFFSET_TYPE]).ok_or_else(|| {
            StoreError::consistency(format!(
                "unknown transactions entry type {}",
                bytes[OFFSET_TYPE]
            ))
        })?;

        if length <= 0 || length as usize != kind.length() {
            return Err(StoreError::consistency(format!(
                "invalid length {} for transactions entry {}",
                length,
                kind.name()
            )));
        }
        if bytes.len() < kind.length() {
            return Err(StoreError::consistency(format!(
                "transactions entry {} incomplete: {} of {} bytes",
                kind.name(),
                bytes.len(),
                kind.length()
            )));
        }

        let timestamp = read_u64(bytes, OFFSET_TIMESTAMP);
        let file_length = read_u64(bytes, OFFSET_FILE_LENGTH);

        Ok(match kind {
            EntryType::FileCreation => TransactionEntry::FileCreation {
                timestamp,
                file_length,
                file_number: read_u64(bytes, OFFSET_FILE_NUMBER),
            },
            EntryType::Store => TransactionEntry::Store {
                timestamp,
                file_length,
            },
            EntryType::Transfer => TransactionEntry::Transfer {
                timestamp,
                file_length,
                source_file_number: read_u64(bytes, OFFSET_FILE_NUMBER),
                source_offset: read_u64(bytes, OFFSET_SPECIAL),
            },
            EntryType::FileTruncation => TransactionEntry::FileTruncation {
                timestamp,
                file_length,
                file_number: read_u64(bytes, OFFSET_FILE_NUMBER),
                old_length: read_u64(bytes, OFFSET_SPECIAL),
            },
            EntryType::FileDeletion => TransactionEntry::FileDeletion {
                timestamp,
                file_length,
                file_number: read_u64(bytes, OFFSET_FILE_NUMBER),
            },
        })
    }
}

/// Append a gap of `length` bytes (1..=127) to `buffer`
pub fn encode_gap(buffer: &mut Vec<u8>, length: usize) -> Result<()> {
    if length == 0 || length > MAX_ENTRY_LENGTH {
        return Err(StoreError::consistency(format!(
            "gap length out of range: {}",
            length
        )));
    }
    buffer.push((-(length as i8)) as u8);
    buffer.resize(buffer.len() + length - 1, 0);
    Ok(())
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}
