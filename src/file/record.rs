//! Entity record layout inside data files
//!
//! ```text
//! ┌──────────────┬─────────────┬───────────────┬──────────────┐
//! │ Length i64(8)│ TypeId (8)  │ ObjectId (8)  │ Body ...     │
//! └──────────────┴─────────────┴───────────────┴──────────────┘
//! ```
//!
//! `Length` covers the whole record including the header. A negative length
//! marks a gap of `|Length|` bytes holding discarded content.

use crate::error::{Result, StoreError};

/// Bytes before the record body
pub const RECORD_HEADER_LENGTH: usize = 24;

/// Smallest gap (just the length field)
pub const MIN_GAP_LENGTH: usize = 8;

/// Parsed record header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub length: u64,
    pub type_id: u64,
    pub object_id: u64,
}

impl RecordHeader {
    /// Header at the start of `bytes`, which must hold a complete header
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_HEADER_LENGTH {
            return Err(StoreError::consistency(format!(
                "record header incomplete: {} bytes",
                bytes.len()
            )));
        }
        let length = read_i64(bytes, 0);
        if length < RECORD_HEADER_LENGTH as i64 {
            return Err(StoreError::consistency(format!(
                "invalid record length {}",
                length
            )));
        }
        Ok(Self {
            length: length as u64,
            type_id: read_i64(bytes, 8) as u64,
            object_id: read_i64(bytes, 16) as u64,
        })
    }
}

/// One slot found while indexing a data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordSlot {
    Entity { position: u64, header: RecordHeader },
    Gap { position: u64, length: u64 },
}

/// Build a record from its parts
pub fn encode_record(type_id: u64, object_id: u64, body: &[u8]) -> Vec<u8> {
    let length = (RECORD_HEADER_LENGTH + body.len()) as i64;
    let mut record = Vec::with_capacity(length as usize);
    record.extend_from_slice(&length.to_le_bytes());
    record.extend_from_slice(&type_id.to_le_bytes());
    record.extend_from_slice(&object_id.to_le_bytes());
    record.extend_from_slice(body);
    record
}

/// Build a gap of `length` bytes
pub fn encode_gap(length: usize) -> Result<Vec<u8>> {
    if length < MIN_GAP_LENGTH {
        return Err(StoreError::consistency(format!(
            "gap length below {}: {}",
            MIN_GAP_LENGTH, length
        )));
    }
    let mut gap = vec![0u8; length];
    gap[..8].copy_from_slice(&(-(length as i64)).to_le_bytes());
    Ok(gap)
}

/// Split `bytes` (located at `base_position`) into entity and gap slots
///
/// The bytes must end exactly at a slot boundary.
pub fn index_records(bytes: &[u8], base_position: u64) -> Result<Vec<RecordSlot>> {
    let mut slots = Vec::new();
    let mut offset = 0usize;

    while offset < bytes.len() {
        let position = base_position + offset as u64;
        if bytes.len() - offset < MIN_GAP_LENGTH {
            return Err(StoreError::consistency(format!(
                "trailing {} bytes at position {} hold no record",
                bytes.len() - offset,
                position
            )));
        }

        let length = read_i64(bytes, offset);
        if length == 0 {
            return Err(StoreError::consistency(format!(
                "zero length record at position {}",
                position
            )));
        }

        let span = length.unsigned_abs() as usize;
        if span > bytes.len() - offset {
            return Err(StoreError::consistency(format!(
                "record at position {} with length {} exceeds available {} bytes",
                position,
                span,
                bytes.len() - offset
            )));
        }

        if length > 0 {
            let header = RecordHeader::parse(&bytes[offset..offset + span])?;
            slots.push(RecordSlot::Entity { position, header });
        } else {
            if span < MIN_GAP_LENGTH {
                return Err(StoreError::consistency(format!(
                    "gap at position {} shorter than {} bytes",
                    position, MIN_GAP_LENGTH
                )));
            }
            slots.push(RecordSlot::Gap {
                position,
                length: span as u64,
            });
        }

        offset += span;
    }

    Ok(slots)
}

/// Structural validation of data file content
pub trait DataFileValidator: Send + Sync {
    fn validate(&self, bytes: &[u8], base_position: u64) -> Result<()>;
}

/// Checks that content decomposes into well-formed records and gaps
#[derive(Debug, Default, Clone, Copy)]
pub struct RecordStructureValidator;

impl DataFileValidator for RecordStructureValidator {
    fn validate(&self, bytes: &[u8], base_position: u64) -> Result<()> {
        index_records(bytes, base_position).map(|_| ())
    }
}

fn read_i64(bytes: &[u8], offset: usize) -> i64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    i64::from_le_bytes(raw)
}
