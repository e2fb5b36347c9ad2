//! Transactions Log Module
//!
//! Binary log recording every length-changing action on a channel's data
//! files. At startup the log is the ground truth against which physical file
//! lengths are validated.
//!
//! ## Responsibilities
//! - Encode/decode the five fixed-layout entry kinds
//! - Forward, resumable scanning with gap skipping
//! - Consistency-checked aggregation into a recovery analysis
//! - Text rendering and compaction of a log
//!
//! ## File Format
//! ```text
//! ┌──────────┬────────┬───────────────┬───────────────┬──────────────┬──────────────┐
//! │ Len (1)  │Type (1)│ Timestamp (8) │ FileLength (8)│ FileNumber(8)│ Special (8)  │
//! └──────────┴────────┴───────────────┴───────────────┴──────────────┴──────────────┘
//!   FileCreation  (0) : 26 bytes, FileNumber = created file
//!   Store         (1) : 18 bytes
//!   Transfer      (2) : 34 bytes, FileNumber = source file, Special = source offset
//!   FileTruncation(3) : 34 bytes, FileNumber = head file,   Special = old length
//!   FileDeletion  (4) : 26 bytes, FileNumber = deleted file
//!
//!   A negative Len marks a gap of |Len| bytes that is skipped unread.
//! ```

mod analysis;
mod assembler;
mod cleaner;
mod entry;
mod reader;

pub use analysis::{EntryAggregator, LoggedFile, TransactionsAnalysis};
pub use assembler::EntryAssembler;
pub use cleaner::TransactionsFileCleaner;
pub use entry::{
    encode_gap, EntryType, TransactionEntry, LENGTH_FILE_CREATION, LENGTH_FILE_DELETION,
    LENGTH_FILE_TRUNCATION, LENGTH_STORE, LENGTH_TRANSFER, MAX_ENTRY_LENGTH,
};
pub use reader::{process_entries, process_file, EntryProcessor};
