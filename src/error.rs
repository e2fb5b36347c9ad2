//! Error types for channelstore
//!
//! Provides a unified error type for all operations.
//!
//! Consistency violations are always fatal: they mean the on-disk or
//! in-memory state is corrupted or ambiguous and must not be retried.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for channelstore operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while reading {path}: {source}")]
    IoReading {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error while writing {path}: {source}")]
    IoWriting {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // Consistency Errors
    // -------------------------------------------------------------------------
    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("Unknown type id {type_id} for object id {object_id}")]
    UnknownType { type_id: u64, object_id: u64 },

    #[error("Rejected record of object id {object_id}: {cause}")]
    InvalidRecord {
        object_id: u64,
        #[source]
        cause: Box<StoreError>,
    },

    // -------------------------------------------------------------------------
    // Garbage Collector Errors
    // -------------------------------------------------------------------------
    #[error("Garbage collector error in channel {channel}: {message}")]
    GarbageCollector { channel: usize, message: String },

    // -------------------------------------------------------------------------
    // Backup Errors
    // -------------------------------------------------------------------------
    #[error("Backup copy failed: {source_file} @ {position} [{length}] -> {target_file}: {cause}")]
    BackupCopying {
        source_file: PathBuf,
        position: u64,
        length: u64,
        target_file: PathBuf,
        #[source]
        cause: Box<StoreError>,
    },

    #[error("Backup error: {0}")]
    Backup(String),

    #[error("Closing backup files failed ({} errors)", .0.len())]
    BackupClose(Vec<StoreError>),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Processing is disabled: {0}")]
    ProcessingDisabled(String),

    #[error("Channel {0} is not available")]
    ChannelUnavailable(usize),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Shorthand for a consistency violation
    pub fn consistency(message: impl Into<String>) -> Self {
        StoreError::Consistency(message.into())
    }

    /// Wrap an IO error raised while reading `path`
    pub fn reading(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::IoReading {
            path: path.into(),
            source,
        }
    }

    /// Wrap an IO error raised while writing `path`
    pub fn writing(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::IoWriting {
            path: path.into(),
            source,
        }
    }

    /// Errors that must disable processing for the whole storage system
    ///
    /// Records rejected before anything was written are not fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StoreError::Io(_)
                | StoreError::IoReading { .. }
                | StoreError::IoWriting { .. }
                | StoreError::Consistency(_)
                | StoreError::UnknownType { .. }
                | StoreError::GarbageCollector { .. }
                | StoreError::BackupCopying { .. }
        )
    }

    /// True for corrupted or ambiguous state
    pub fn is_consistency_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Consistency(_) | StoreError::UnknownType { .. }
        )
    }
}
