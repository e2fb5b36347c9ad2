//! Data file evaluation
//!
//! Decides when the head file is retired and which files are dissolved.

use crate::config::StorageConfig;

/// Snapshot of a data file's shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFileView {
    pub number: u64,
    pub total_length: u64,
    pub data_length: u64,
    pub is_head: bool,
    /// Exactly one entity and no gaps
    pub is_single_entity: bool,
}

impl DataFileView {
    pub fn fill_ratio(&self) -> f64 {
        if self.total_length == 0 {
            return 1.0;
        }
        self.data_length as f64 / self.total_length as f64
    }
}

/// Dissolving and retirement policy
pub trait DataFileEvaluator: Send + Sync {
    fn file_minimum_size(&self) -> u64;

    fn file_maximum_size(&self) -> u64;

    fn transaction_file_maximum_size(&self) -> u64;

    /// Whether a file's live content should be moved away and the file deleted
    fn needs_dissolving(&self, file: &DataFileView) -> bool;

    /// Whether the head file with `total_length` bytes must be replaced
    fn needs_retirement(&self, total_length: u64) -> bool {
        total_length >= self.file_maximum_size()
    }
}

/// Size and use-ratio based evaluator
#[derive(Debug, Clone)]
pub struct DefaultDataFileEvaluator {
    minimum_size: u64,
    maximum_size: u64,
    minimum_use_ratio: f64,
    cleanup_head_file: bool,
    transaction_file_maximum_size: u64,
}

impl DefaultDataFileEvaluator {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            minimum_size: config.data_file_minimum_size,
            maximum_size: config.data_file_maximum_size,
            minimum_use_ratio: config.data_file_minimum_use_ratio,
            cleanup_head_file: config.data_file_cleanup_head_file,
            transaction_file_maximum_size: config.transaction_file_maximum_size,
        }
    }
}

impl DataFileEvaluator for DefaultDataFileEvaluator {
    fn file_minimum_size(&self) -> u64 {
        self.minimum_size
    }

    fn file_maximum_size(&self) -> u64 {
        self.maximum_size
    }

    fn transaction_file_maximum_size(&self) -> u64 {
        self.transaction_file_maximum_size
    }

    fn needs_dissolving(&self, file: &DataFileView) -> bool {
        if file.is_head && !self.cleanup_head_file {
            return false;
        }

        if file.total_length < self.minimum_size && !file.is_head {
            return true;
        }

        if file.fill_ratio() < self.minimum_use_ratio {
            return true;
        }

        // a single oversized entity can live nowhere else
        file.total_length > self.maximum_size && !file.is_single_entity
    }
}
