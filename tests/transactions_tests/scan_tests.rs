//! Tests for log entry encoding and scanning
//!
//! These tests verify:
//! - Fixed entry layouts (length byte, type byte, little-endian fields)
//! - Gap skipping and partial tails during scans
//! - Scanning whole files across read window boundaries
//! - Text rendering of a log

use std::fs;

use channelstore::transactions::{
    encode_gap, process_entries, process_file, EntryAssembler, TransactionEntry,
};
use channelstore::StoreError;

use crate::common::{setup_temp_storage, EntryCollector};

// =============================================================================
// Helper Functions
// =============================================================================

fn encode_all(entries: &[TransactionEntry]) -> Vec<u8> {
    let mut buffer = Vec::new();
    for entry in entries {
        entry.encode_into(&mut buffer);
    }
    buffer
}

fn sample_entries() -> Vec<TransactionEntry> {
    vec![
        TransactionEntry::FileCreation {
            timestamp: 1_000,
            file_length: 0,
            file_number: 1,
        },
        TransactionEntry::Store {
            timestamp: 1_001,
            file_length: 40,
        },
        TransactionEntry::Transfer {
            timestamp: 1_002,
            file_length: 120,
            source_file_number: 7,
            source_offset: 4096,
        },
        TransactionEntry::FileTruncation {
            timestamp: 1_003,
            file_length: 80,
            file_number: 1,
            old_length: 120,
        },
        TransactionEntry::FileDeletion {
            timestamp: 1_004,
            file_length: 512,
            file_number: 7,
        },
    ]
}

fn u64_at(bytes: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap())
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_entry_layouts() {
    let expected = [(26u8, 0u8), (18, 1), (34, 2), (34, 3), (26, 4)];

    for (entry, (length, code)) in sample_entries().iter().zip(expected) {
        let bytes = entry.encode();
        assert_eq!(bytes.len(), length as usize, "{:?}", entry);
        assert_eq!(bytes[0], length);
        assert_eq!(bytes[1], code);
        assert_eq!(u64_at(&bytes, 2), entry.timestamp());
        assert_eq!(u64_at(&bytes, 10), entry.file_length());
        assert_eq!(TransactionEntry::decode(&bytes).unwrap(), *entry);
    }
}

#[test]
fn test_transfer_carries_source_file_and_offset() {
    let entry = TransactionEntry::Transfer {
        timestamp: 5,
        file_length: 900,
        source_file_number: 3,
        source_offset: 256,
    };
    let bytes = entry.encode();

    assert_eq!(u64_at(&bytes, 18), 3);
    assert_eq!(u64_at(&bytes, 26), 256);
}

#[test]
fn test_decode_rejects_unknown_type() {
    let mut bytes = TransactionEntry::Store {
        timestamp: 1,
        file_length: 2,
    }
    .encode();
    bytes[1] = 9;

    assert!(matches!(
        TransactionEntry::decode(&bytes),
        Err(StoreError::Consistency(_))
    ));
}

// =============================================================================
// Scan Tests
// =============================================================================

#[test]
fn test_scan_skips_gaps() {
    let entries = sample_entries();
    let mut bytes = entries[0].encode();
    encode_gap(&mut bytes, 11).unwrap();
    entries[1].encode_into(&mut bytes);
    encode_gap(&mut bytes, 127).unwrap();
    entries[2].encode_into(&mut bytes);

    let mut collector = EntryCollector::default();
    let consumed = process_entries(&bytes, 0, &mut collector).unwrap();

    assert_eq!(consumed, bytes.len());
    assert_eq!(collector.entries, entries[..3].to_vec());
}

#[test]
fn test_scan_stops_before_partial_entry() {
    let entries = sample_entries();
    let complete = encode_all(&entries[..2]);
    let mut bytes = complete.clone();
    bytes.extend_from_slice(&entries[2].encode()[..20]);

    let mut collector = EntryCollector::default();
    let consumed = process_entries(&bytes, 0, &mut collector).unwrap();

    assert_eq!(consumed, complete.len());
    assert_eq!(collector.entries.len(), 2);
}

#[test]
fn test_scan_zero_length_is_corruption() {
    let mut bytes = sample_entries()[0].encode();
    bytes.push(0);
    bytes.extend_from_slice(&[0u8; 30]);

    let mut collector = EntryCollector::default();
    let result = process_entries(&bytes, 0, &mut collector);

    assert!(matches!(result, Err(StoreError::Consistency(_))));
}

#[test]
fn test_process_file_crosses_read_windows() {
    let (_temp, path) = setup_temp_storage();
    let log = path.join("transactions_0.sft");

    // 18 byte entries do not divide the 64 KiB window evenly
    let mut entries = vec![TransactionEntry::FileCreation {
        timestamp: 1,
        file_length: 0,
        file_number: 1,
    }];
    for i in 0..5_000u64 {
        entries.push(TransactionEntry::Store {
            timestamp: 2 + i,
            file_length: (i + 1) * 40,
        });
    }
    let bytes = encode_all(&entries);
    fs::write(&log, &bytes).unwrap();

    let mut collector = EntryCollector::default();
    let consumed = process_file(&log, &mut collector).unwrap();

    assert_eq!(consumed, bytes.len() as u64);
    assert_eq!(collector.entries, entries);
}

#[test]
fn test_process_file_reports_torn_tail() {
    let (_temp, path) = setup_temp_storage();
    let log = path.join("transactions_0.sft");

    let complete = encode_all(&sample_entries()[..2]);
    let mut bytes = complete.clone();
    bytes.extend_from_slice(&[34, 2, 7, 7]);
    fs::write(&log, &bytes).unwrap();

    let mut collector = EntryCollector::default();
    let consumed = process_file(&log, &mut collector).unwrap();

    assert_eq!(consumed, complete.len() as u64);
    assert_eq!(collector.entries.len(), 2);
}

// =============================================================================
// Assembler Tests
// =============================================================================

#[test]
fn test_assembler_renders_one_line_per_entry() {
    let (_temp, path) = setup_temp_storage();
    let log = path.join("transactions_0.sft");
    fs::write(&log, encode_all(&sample_entries())).unwrap();

    let text = EntryAssembler::assemble_file(&log).unwrap();
    let lines: Vec<&str> = text.lines().collect();

    assert_eq!(lines.len(), 6);
    assert!(lines[0].starts_with("Type\tTimestamp"));

    let kinds: Vec<&str> = lines[1..]
        .iter()
        .map(|line| line.split('\t').next().unwrap())
        .collect();
    assert_eq!(
        kinds,
        ["FILE_CREATION", "STORE", "TRANSFER", "FILE_TRUNCATION", "FILE_DELETION"]
    );

    // the store grows file 1 from 0 to 40 bytes
    let store: Vec<&str> = lines[2].split('\t').collect();
    assert_eq!(store[3], "1001");
    assert_eq!(store[4], "40");
    assert_eq!(store[5], "40");
    assert_eq!(store[6], "1");
}
