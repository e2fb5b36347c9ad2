//! Backup file inventory
//!
//! Open backup counterparts of one channel's files, keyed by data file
//! number, plus the transactions file mirror.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Result, StoreError};
use crate::file::{ChannelFile, FileKind, FileProvider};

#[derive(Debug)]
pub(crate) struct BackupInventory {
    channel: usize,
    data_files: BTreeMap<u64, Arc<ChannelFile>>,
    transactions: Arc<ChannelFile>,
}

impl BackupInventory {
    /// Discover what already exists in the backup location
    pub(crate) fn read(channel: usize, provider: &dyn FileProvider) -> Result<Self> {
        let data_files = provider
            .collect_data_files(channel)?
            .into_iter()
            .map(|(number, path)| {
                let file = ChannelFile::new(channel, FileKind::Data { number }, path);
                (number, Arc::new(file))
            })
            .collect::<BTreeMap<_, _>>();

        let transactions = Arc::new(ChannelFile::new(
            channel,
            FileKind::Transactions,
            provider.transactions_file(channel),
        ));

        debug!(channel, files = data_files.len(), "read backup inventory");
        Ok(Self {
            channel,
            data_files,
            transactions,
        })
    }

    pub(crate) fn has_data_files(&self) -> bool {
        !self.data_files.is_empty()
    }

    pub(crate) fn data_file_numbers(&self) -> Vec<u64> {
        self.data_files.keys().copied().collect()
    }

    pub(crate) fn data_file(&self, number: u64) -> Option<&Arc<ChannelFile>> {
        self.data_files.get(&number)
    }

    /// Highest numbered backup data file holding any bytes
    pub(crate) fn last_populated_number(&self) -> Result<Option<u64>> {
        for (number, file) in self.data_files.iter().rev() {
            if file.size()? > 0 {
                return Ok(Some(*number));
            }
        }
        Ok(None)
    }

    pub(crate) fn transactions(&self) -> &Arc<ChannelFile> {
        &self.transactions
    }

    /// Backup counterpart of `source`, registered on first use
    pub(crate) fn counterpart(
        &mut self,
        source: &ChannelFile,
        provider: &dyn FileProvider,
    ) -> Result<Arc<ChannelFile>> {
        if source.channel() != self.channel {
            return Err(StoreError::Backup(format!(
                "{} does not belong to channel {}",
                source.path().display(),
                self.channel
            )));
        }
        match source.kind() {
            FileKind::Transactions => Ok(Arc::clone(&self.transactions)),
            FileKind::Data { number } => {
                let channel = self.channel;
                let file = self.data_files.entry(number).or_insert_with(|| {
                    Arc::new(ChannelFile::new(
                        channel,
                        FileKind::Data { number },
                        provider.data_file(channel, number),
                    ))
                });
                Ok(Arc::clone(file))
            }
        }
    }

    /// Forget a backup data file, returning its handle
    pub(crate) fn remove(&mut self, number: u64) -> Option<Arc<ChannelFile>> {
        self.data_files.remove(&number)
    }

    /// Close every open handle, collecting failures
    pub(crate) fn close_all(&self, errors: &mut Vec<StoreError>) {
        for file in self.data_files.values() {
            if let Err(e) = file.close() {
                errors.push(e);
            }
        }
        if let Err(e) = self.transactions.close() {
            errors.push(e);
        }
    }
}
