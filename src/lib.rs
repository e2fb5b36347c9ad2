//! # channelstore
//!
//! An embedded object storage engine partitioned into channels:
//! - Append-only data files with compaction by dissolving sparse files
//! - A fixed-format transactions log validating file lengths at recovery
//! - A per-channel entity cache with a concurrent tri-color garbage collector
//! - An online backup mirror with drift healing
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                              │
//! │         (routing, two-phase stores, thread lifecycle)        │
//! └──────────┬──────────────────┬───────────────────┬───────────┘
//!            │                  │                   │
//!     ┌──────▼──────┐    ┌──────▼──────┐     ┌──────▼──────┐
//!     │  Channel 0  │    │  Channel 1  │ ... │  Channel n  │
//!     │ EntityCache │    │ EntityCache │     │ EntityCache │
//!     │ FileManager │    │ FileManager │     │ FileManager │
//!     └──────┬──────┘    └──────┬──────┘     └──────┬──────┘
//!            │   MarkMonitor (cross-channel marking)│
//!            └──────────────────┬───────────────────┘
//!                               ▼
//!                      ┌─────────────────┐
//!                      │  BackupHandler  │
//!                      └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod clock;

pub mod transactions;
pub mod file;
pub mod cache;
pub mod gc;
pub mod backup;
pub mod channel;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::{StorageConfig, StorageConfigBuilder};
pub use cache::{
    LayoutTypeHandler, MapTypeDictionary, OpaqueTypeDictionary, ReferenceLayout, TypeDictionary,
    TypeHandler,
};
pub use channel::{EntityLocation, StorageChannel};
pub use engine::{Engine, EngineBuilder};
pub use file::encode_record;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of channelstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
