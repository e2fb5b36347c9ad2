//! Text rendering of a transactions log
//!
//! One tab-separated line per entry, for inspection with standard tools.

use std::fmt::Write as _;
use std::path::Path;

use crate::error::Result;

use super::entry::TransactionEntry;
use super::reader::{process_file, EntryProcessor};

const HEADER: &str = "Type\tTimestamp\tTime Delta\tTimestamp(raw)\tResulting Length\t\
Length Change\tCurrent Head File\tSignificant File\tSpecial Offset";

/// Renders entries as text lines
#[derive(Debug, Default)]
pub struct EntryAssembler {
    output: String,
    last_timestamp: Option<u64>,
    last_length: u64,
    head_file: Option<u64>,
}

impl EntryAssembler {
    pub fn new() -> Self {
        let mut output = String::with_capacity(4096);
        output.push_str(HEADER);
        output.push('\n');
        Self {
            output,
            ..Self::default()
        }
    }

    /// Render the log at `path`
    pub fn assemble_file(path: &Path) -> Result<String> {
        let mut assembler = Self::new();
        process_file(path, &mut assembler)?;
        Ok(assembler.finish())
    }

    pub fn assemble(&mut self, entry: &TransactionEntry) {
        let timestamp = entry.timestamp();
        let delta = self
            .last_timestamp
            .map(|last| timestamp as i128 - last as i128)
            .unwrap_or(0);

        if let TransactionEntry::FileCreation { file_number, .. } = entry {
            self.head_file = Some(*file_number);
            self.last_length = 0;
        }

        let length = entry.file_length();
        let change = match entry {
            // lengths of deleted files are unrelated to the head file
            TransactionEntry::FileDeletion { .. } => 0,
            _ => length as i128 - self.last_length as i128,
        };

        // writing into a String cannot fail
        let _ = writeln!(
            self.output,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            entry.entry_type().name(),
            format_timestamp(timestamp),
            delta,
            timestamp,
            length,
            change,
            optional(self.head_file),
            optional(entry.file_number()),
            optional(entry.special_offset()),
        );

        if !matches!(entry, TransactionEntry::FileDeletion { .. }) {
            self.last_length = length;
        }
        self.last_timestamp = Some(timestamp);
    }

    pub fn finish(self) -> String {
        self.output
    }
}

impl EntryProcessor for EntryAssembler {
    fn accept(&mut self, _position: u64, bytes: &[u8]) -> Result<bool> {
        let entry = TransactionEntry::decode(bytes)?;
        self.assemble(&entry);
        Ok(true)
    }
}

fn optional(value: Option<u64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Format a nanosecond UNIX timestamp as `YYYY-MM-DD HH:MM:SS.nnnnnnnnn`
fn format_timestamp(nanos: u64) -> String {
    let secs = nanos / 1_000_000_000;
    let sub = nanos % 1_000_000_000;
    let days = (secs / 86_400) as i64;
    let rem = secs % 86_400;

    let (year, month, day) = civil_from_days(days);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:09}",
        year,
        month,
        day,
        rem / 3600,
        (rem % 3600) / 60,
        rem % 60,
        sub
    )
}

/// Days since 1970-01-01 to a proleptic Gregorian date
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
