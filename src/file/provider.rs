//! File naming and discovery
//!
//! Maps (channel, file number) to paths and discovers existing data files.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, StoreError};

/// Resolves where a channel's files live
pub trait FileProvider: Send + Sync {
    fn data_file(&self, channel: usize, number: u64) -> PathBuf;

    fn transactions_file(&self, channel: usize) -> PathBuf;

    /// Scratch path used while rewriting the transactions file
    fn transactions_scratch_file(&self, channel: usize) -> PathBuf {
        self.transactions_file(channel).with_extension("tmp")
    }

    /// Existing data files of a channel, ascending by number
    fn collect_data_files(&self, channel: usize) -> Result<Vec<(u64, PathBuf)>>;

    /// Destination for a deleted file, `None` to remove it outright
    fn deletion_target(&self, _channel: usize, _path: &Path) -> Option<PathBuf> {
        None
    }
}

/// Directory layout:
///
/// ```text
/// {base}/channel_{i}/channel_{i}_{n}.dat
/// {base}/channel_{i}/transactions_{i}.sft
/// ```
#[derive(Debug, Clone)]
pub struct DirectoryFileProvider {
    base_dir: PathBuf,
    deletion_dir: Option<PathBuf>,
}

impl DirectoryFileProvider {
    const DATA_EXTENSION: &'static str = "dat";
    const TRANSACTIONS_EXTENSION: &'static str = "sft";

    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            deletion_dir: None,
        }
    }

    pub fn with_deletion_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.deletion_dir = Some(dir.into());
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn channel_dir(&self, channel: usize) -> PathBuf {
        self.base_dir.join(format!("channel_{}", channel))
    }

    /// "channel_3_17.dat" → Some(17) for channel 3
    fn parse_data_file_number(channel: usize, path: &Path) -> Option<u64> {
        if path.extension()?.to_str()? != Self::DATA_EXTENSION {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let prefix = format!("channel_{}_", channel);
        stem.strip_prefix(&prefix)?.parse().ok()
    }
}

impl FileProvider for DirectoryFileProvider {
    fn data_file(&self, channel: usize, number: u64) -> PathBuf {
        self.channel_dir(channel).join(format!(
            "channel_{}_{}.{}",
            channel,
            number,
            Self::DATA_EXTENSION
        ))
    }

    fn transactions_file(&self, channel: usize) -> PathBuf {
        self.channel_dir(channel).join(format!(
            "transactions_{}.{}",
            channel,
            Self::TRANSACTIONS_EXTENSION
        ))
    }

    fn collect_data_files(&self, channel: usize) -> Result<Vec<(u64, PathBuf)>> {
        let dir = self.channel_dir(channel);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| StoreError::reading(&dir, e))? {
            let entry = entry.map_err(|e| StoreError::reading(&dir, e))?;
            let path = entry.path();
            if path.is_file() {
                if let Some(number) = Self::parse_data_file_number(channel, &path) {
                    files.push((number, path));
                }
            }
        }

        files.sort_by_key(|(number, _)| *number);
        Ok(files)
    }

    fn deletion_target(&self, channel: usize, path: &Path) -> Option<PathBuf> {
        let dir = self.deletion_dir.as_ref()?;
        let name = path.file_name()?;
        Some(dir.join(format!("channel_{}", channel)).join(name))
    }
}
