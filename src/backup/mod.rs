//! Backup Module
//!
//! Online mirror of every channel's files in a second directory.
//!
//! ## Responsibilities
//! - Startup synchronization with drift healing
//! - Replaying mirrored mutations from the channels' file writers
//! - Verified range copies (CRC32 plus record structure)
//!
//! ## Flow
//! ```text
//!   channel thread                      backup thread
//!   FileManager ─► BackupMirroringWriter ──► BackupItemQueue ──► BackupHandler
//!                     (copy/truncate/delete)                      │
//!                                                                 ▼
//!                                                  {backup}/channel_i/...
//! ```

mod handler;
mod inventory;
mod queue;

pub use handler::{BackupHandler, BACKUP_POLL_INTERVAL};
pub use queue::{BackupItem, BackupItemEnqueuer, BackupItemQueue};
