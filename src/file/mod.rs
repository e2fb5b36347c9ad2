//! File Module
//!
//! Everything a channel does with its files.
//!
//! ## Responsibilities
//! - File handles shared with the backup thread
//! - Naming and discovery of data and transactions files
//! - Entity record layout of data files
//! - The data file ring and its entity chains
//! - Store, rollover, dissolving and recovery (FileManager)
//! - Pluggable writers, evaluators and write gates
//!
//! ## Layout
//! ```text
//!   {base}/channel_0/
//!     ├── channel_0_1.dat    oldest
//!     ├── channel_0_2.dat
//!     ├── channel_0_3.dat    head (appendable)
//!     └── transactions_0.sft
//!
//!   ring:  1 ──► 2 ──► 3(head) ──► 1 ...
//! ```

mod channel_file;
mod controller;
mod data_file;
mod evaluator;
mod inventory;
mod manager;
mod provider;
mod record;
mod writer;

pub use channel_file::{ChannelFile, FileKind};
pub use controller::{OperationController, SwitchableWriteController, WriteController};
pub use data_file::{DataFile, DataFileRing, FileRef};
pub use evaluator::{DataFileEvaluator, DataFileView, DefaultDataFileEvaluator};
pub use inventory::StorageInventory;
pub use manager::{ChannelStatistics, FileManager, FileStatistics};
pub use provider::{DirectoryFileProvider, FileProvider};
pub use record::{
    encode_gap as encode_record_gap, encode_record, index_records, DataFileValidator,
    RecordHeader, RecordSlot, RecordStructureValidator, MIN_GAP_LENGTH, RECORD_HEADER_LENGTH,
};
pub use writer::{BackupMirroringWriter, DirectFileWriter, FileWriter};
