//! Configuration for channelstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Smallest allowed data file size bound (and the minimum gap between bounds)
pub const FILE_SIZE_GRANULARITY: u64 = 1024;

/// Largest allowed data file size bound (positions are 32-bit)
pub const FILE_SIZE_CEILING: u64 = i32::MAX as u64;

/// Largest supported channel count
pub const MAX_CHANNEL_COUNT: usize = 1024;

/// Main configuration for a storage instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    // -------------------------------------------------------------------------
    // Storage Layout
    // -------------------------------------------------------------------------
    /// Root directory for all channel files
    /// Internal structure:
    ///   {base_dir}/
    ///     └── channel_{i}/
    ///           ├── channel_{i}_{n}.dat   (data files)
    ///           └── transactions_{i}.sft  (transactions log)
    pub base_dir: PathBuf,

    /// Number of channels, a power of two
    pub channel_count: usize,

    /// Where deleted files are moved instead of being removed
    pub deletion_dir: Option<PathBuf>,

    // -------------------------------------------------------------------------
    // Data File Evaluation
    // -------------------------------------------------------------------------
    /// Files below this size are dissolved (unless head)
    pub data_file_minimum_size: u64,

    /// Head files at or above this size are retired
    pub data_file_maximum_size: u64,

    /// Files with less live data than this ratio are dissolved
    pub data_file_minimum_use_ratio: f64,

    /// Whether the head file itself may be dissolved
    pub data_file_cleanup_head_file: bool,

    /// Transactions files above this size are compacted
    pub transaction_file_maximum_size: u64,

    // -------------------------------------------------------------------------
    // Entity Cache
    // -------------------------------------------------------------------------
    /// Cached entities untouched for this long are evicted (milliseconds)
    pub entity_cache_timeout_ms: u64,

    /// Abstract cache size threshold used by the eviction formula
    pub entity_cache_threshold: u64,

    // -------------------------------------------------------------------------
    // Garbage Collection
    // -------------------------------------------------------------------------
    /// Enables garbage collection during housekeeping
    pub gc_enabled: bool,

    /// Bounded wait for cross-channel marking work (milliseconds)
    pub marking_wait_time_ms: u64,

    /// Object ids taken from the mark queue per batch
    pub marking_buffer_length: usize,

    /// Buffered reference ids per target channel before flushing
    pub reference_cache_length: usize,

    /// Type whose entities are the roots of the object graph
    pub root_type_id: Option<u64>,

    // -------------------------------------------------------------------------
    // Housekeeping
    // -------------------------------------------------------------------------
    /// Idle time between housekeeping passes (milliseconds)
    pub housekeeping_interval_ms: u64,

    /// Time budget per housekeeping step (nanoseconds)
    pub housekeeping_time_budget_ns: u64,

    // -------------------------------------------------------------------------
    // Backup
    // -------------------------------------------------------------------------
    /// Mirror directory, backup is disabled when absent
    pub backup_dir: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("./channelstore_data"),
            channel_count: 1,
            deletion_dir: None,
            data_file_minimum_size: 1024 * 1024,         // 1 MiB
            data_file_maximum_size: 8 * 1024 * 1024,     // 8 MiB
            data_file_minimum_use_ratio: 0.75,
            data_file_cleanup_head_file: true,
            transaction_file_maximum_size: 100 * 1024 * 1024, // 100 MiB
            entity_cache_timeout_ms: 86_400_000,         // 1 day
            entity_cache_threshold: 1_000_000_000,
            gc_enabled: true,
            marking_wait_time_ms: 100,
            marking_buffer_length: 10_000,
            reference_cache_length: 100,
            root_type_id: None,
            housekeeping_interval_ms: 1_000,
            housekeeping_time_budget_ns: 10_000_000,     // 10 ms
            backup_dir: None,
        }
    }
}

impl StorageConfig {
    /// Create a new config builder
    pub fn builder() -> StorageConfigBuilder {
        StorageConfigBuilder::default()
    }

    /// Check every bound, returning the first violation
    pub fn validate(&self) -> Result<()> {
        if self.channel_count == 0
            || !self.channel_count.is_power_of_two()
            || self.channel_count > MAX_CHANNEL_COUNT
        {
            return Err(StoreError::Config(format!(
                "channel count must be a power of two in [1, {}]: {}",
                MAX_CHANNEL_COUNT, self.channel_count
            )));
        }

        for (name, value) in [
            ("minimum file size", self.data_file_minimum_size),
            ("maximum file size", self.data_file_maximum_size),
        ] {
            if !(FILE_SIZE_GRANULARITY..=FILE_SIZE_CEILING).contains(&value) {
                return Err(StoreError::Config(format!(
                    "{} must be in [{}, {}]: {}",
                    name, FILE_SIZE_GRANULARITY, FILE_SIZE_CEILING, value
                )));
            }
        }

        if self.data_file_maximum_size - FILE_SIZE_GRANULARITY < self.data_file_minimum_size {
            return Err(StoreError::Config(format!(
                "maximum file size {} must exceed minimum file size {} by at least {}",
                self.data_file_maximum_size, self.data_file_minimum_size, FILE_SIZE_GRANULARITY
            )));
        }

        let ratio = self.data_file_minimum_use_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(StoreError::Config(format!(
                "minimum use ratio must be in (0, 1]: {}",
                ratio
            )));
        }

        if self.marking_buffer_length == 0 || self.reference_cache_length == 0 {
            return Err(StoreError::Config(
                "marking buffer and reference cache lengths must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Bit mask selecting the channel index from an object id
    pub fn channel_mask(&self) -> u64 {
        self.channel_count as u64 - 1
    }

    /// Channel owning the given object id
    pub fn channel_of(&self, object_id: u64) -> usize {
        (object_id & self.channel_mask()) as usize
    }
}

/// Builder for StorageConfig
#[derive(Default)]
pub struct StorageConfigBuilder {
    config: StorageConfig,
}

impl StorageConfigBuilder {
    /// Set the base directory (root for all channels)
    pub fn base_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.base_dir = path.into();
        self
    }

    /// Set the channel count (power of two)
    pub fn channel_count(mut self, count: usize) -> Self {
        self.config.channel_count = count;
        self
    }

    /// Move deleted files to this directory instead of removing them
    pub fn deletion_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.deletion_dir = Some(path.into());
        self
    }

    /// Set the minimum and maximum data file sizes (in bytes)
    pub fn data_file_size(mut self, minimum: u64, maximum: u64) -> Self {
        self.config.data_file_minimum_size = minimum;
        self.config.data_file_maximum_size = maximum;
        self
    }

    /// Set the minimum live data ratio of a data file
    pub fn data_file_minimum_use_ratio(mut self, ratio: f64) -> Self {
        self.config.data_file_minimum_use_ratio = ratio;
        self
    }

    /// Allow or forbid dissolving the head file
    pub fn data_file_cleanup_head_file(mut self, enabled: bool) -> Self {
        self.config.data_file_cleanup_head_file = enabled;
        self
    }

    /// Set the transactions file size that triggers compaction
    pub fn transaction_file_maximum_size(mut self, size: u64) -> Self {
        self.config.transaction_file_maximum_size = size;
        self
    }

    /// Set the entity cache timeout (in milliseconds)
    pub fn entity_cache_timeout_ms(mut self, ms: u64) -> Self {
        self.config.entity_cache_timeout_ms = ms;
        self
    }

    /// Set the entity cache threshold
    pub fn entity_cache_threshold(mut self, threshold: u64) -> Self {
        self.config.entity_cache_threshold = threshold;
        self
    }

    /// Enable or disable garbage collection
    pub fn gc_enabled(mut self, enabled: bool) -> Self {
        self.config.gc_enabled = enabled;
        self
    }

    /// Set the bounded marking wait (in milliseconds)
    pub fn marking_wait_time_ms(mut self, ms: u64) -> Self {
        self.config.marking_wait_time_ms = ms;
        self
    }

    /// Set the mark queue batch length
    pub fn marking_buffer_length(mut self, length: usize) -> Self {
        self.config.marking_buffer_length = length;
        self
    }

    /// Set the per-target-channel reference buffer length
    pub fn reference_cache_length(mut self, length: usize) -> Self {
        self.config.reference_cache_length = length;
        self
    }

    /// Set the root type id
    pub fn root_type_id(mut self, type_id: u64) -> Self {
        self.config.root_type_id = Some(type_id);
        self
    }

    /// Set the housekeeping interval (in milliseconds)
    pub fn housekeeping_interval_ms(mut self, ms: u64) -> Self {
        self.config.housekeeping_interval_ms = ms;
        self
    }

    /// Set the housekeeping time budget (in nanoseconds)
    pub fn housekeeping_time_budget_ns(mut self, ns: u64) -> Self {
        self.config.housekeeping_time_budget_ns = ns;
        self
    }

    /// Enable backup into the given directory
    pub fn backup_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.backup_dir = Some(path.into());
        self
    }

    pub fn build(self) -> Result<StorageConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
