//! Transactions log scanner
//!
//! Forward scan over encoded entries. Scanning is resumable: whenever the
//! bytes at hand end inside an entry, the scan reports the boundary of the
//! last complete entry and the caller reloads from there.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{Result, StoreError};

/// Read window used when scanning a log file
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Consumer of complete log entries
pub trait EntryProcessor {
    /// Handle the entry starting at `bytes[0]`, located at `position` in the log
    ///
    /// `bytes` holds at least the complete entry. Returning `false` stops the
    /// scan before this entry; it is reported as not consumed.
    fn accept(&mut self, position: u64, bytes: &[u8]) -> Result<bool>;
}

/// Scan `bytes` (located at `base_position` in the log)
///
/// Returns the number of bytes covered by complete entries and gaps. A zero
/// length byte is corruption.
pub fn process_entries(
    bytes: &[u8],
    base_position: u64,
    processor: &mut dyn EntryProcessor,
) -> Result<usize> {
    let mut offset = 0usize;

    while offset < bytes.len() {
        let length = bytes[offset] as i8;
        if length == 0 {
            return Err(StoreError::consistency(format!(
                "zero length transactions entry at position {}",
                base_position + offset as u64
            )));
        }

        let span = length.unsigned_abs() as usize;
        if offset + span > bytes.len() {
            // entry or gap continues past the loaded bytes
            break;
        }

        if length > 0 && !processor.accept(base_position + offset as u64, &bytes[offset..])? {
            break;
        }

        offset += span;
    }

    Ok(offset)
}

/// Scan a whole log file, returning the position after the last complete entry
///
/// A trailing incomplete entry (torn append) is left unconsumed, so the
/// returned position can be smaller than the file length.
pub fn process_file(path: &Path, processor: &mut dyn EntryProcessor) -> Result<u64> {
    let mut file = File::open(path).map_err(|e| StoreError::reading(path, e))?;
    let size = file
        .metadata()
        .map_err(|e| StoreError::reading(path, e))?
        .len();

    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    let mut position = 0u64;

    while position < size {
        let chunk = (size - position).min(buffer.len() as u64) as usize;

        file.seek(SeekFrom::Start(position))
            .map_err(|e| StoreError::reading(path, e))?;
        file.read_exact(&mut buffer[..chunk])
            .map_err(|e| StoreError::reading(path, e))?;

        let consumed = process_entries(&buffer[..chunk], position, processor)?;
        if consumed == 0 {
            break;
        }
        position += consumed as u64;
    }

    Ok(position)
}
